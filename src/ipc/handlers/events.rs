use crate::error::CoreError;
use crate::events;
use crate::ipc::helpers::{get_optional_str, parse_actor, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const DEFAULT_AUDIT_LIMIT: i64 = 200;

fn handle_notifications_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let admin_school = actor.school_id.as_deref().filter(|_| actor.is_admin());
        let rows = events::list_notifications(conn, &actor.user_id, admin_school)
            .map_err(CoreError::from)?;
        Ok(json!({ "notifications": to_json(&rows)? }))
    })
}

fn handle_audit_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        if !actor.is_admin() {
            return Err(CoreError::Forbidden("audit log is limited to administrators".to_string()).into());
        }
        let resource = get_optional_str(params, "resource");
        let resource_id = get_optional_str(params, "resourceId");
        let limit = params
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, 1000);
        let rows = events::list_audit(conn, resource.as_deref(), resource_id.as_deref(), limit)
            .map_err(CoreError::from)?;
        Ok(json!({ "entries": to_json(&rows)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}

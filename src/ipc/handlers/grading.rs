use crate::db;
use crate::error::CoreError;
use crate::grading;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, parse_actor, with_db};
use crate::ipc::types::{AppState, Request};
use crate::records;
use serde_json::{json, Value};

fn handle_grading_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let school_id = get_required_str(params, "schoolId")?;
        actor.require_school(&school_id)?;
        let config = grading::load_config(conn, &school_id).map_err(CoreError::from)?;
        Ok(json!({ "schoolId": school_id, "config": config.to_json() }))
    })
}

/// Patches are merged over the current config and validated as a whole
/// before anything is stored.
fn handle_grading_update(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let school_id = get_required_str(params, "schoolId")?;
        let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
            return Err(HandlerErr::bad_params("patch must be an object"));
        };
        actor.require_admin_of(&school_id)?;
        records::require_school(conn, &school_id)?;

        let mut config = grading::load_config(conn, &school_id).map_err(CoreError::from)?;
        config.merge_patch(patch)?;
        let stored = config.to_json();
        db::settings_set_json(conn, &grading::settings_key(&school_id), &stored)
            .map_err(CoreError::from)?;
        tracing::info!(school_id = %school_id, actor = %actor.user_id, "grading config updated");
        crate::events::record_audit(
            conn,
            &actor.user_id,
            "grading.update",
            "school",
            Some(&school_id),
            json!({ "patch": patch }),
        );
        Ok(json!({ "schoolId": school_id, "config": stored }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grading.get" => Some(handle_grading_get(state, req)),
        "grading.update" => Some(handle_grading_update(state, req)),
        _ => None,
    }
}

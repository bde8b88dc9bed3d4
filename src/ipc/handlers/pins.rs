use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_ids, get_optional_str, get_required_str, parse_actor, parse_params, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::pins::{self, CheckRequest, IssueRequest};
use serde_json::{json, Value};

fn handle_pins_issue(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let issue: IssueRequest = parse_params(params, None)?;
        let issued = pins::issue_pins(conn, &actor, &issue)?;
        Ok(json!({ "count": issued.len(), "pins": to_json(&issued)? }))
    })
}

fn handle_pins_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let school_id = get_required_str(params, "schoolId")?;
        let session = get_optional_str(params, "session");
        let term = get_optional_str(params, "term");
        let rows = pins::list_pins(conn, &actor, &school_id, session.as_deref(), term.as_deref())?;
        Ok(json!({ "pins": to_json(&rows)? }))
    })
}

fn handle_pins_attempts(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let pin_id = get_required_str(params, "pinId")?;
        let rows = pins::pin_attempts(conn, &actor, &pin_id)?;
        Ok(json!({ "attempts": to_json(&rows)? }))
    })
}

fn handle_pins_delete(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let ids = get_ids(params, "pinIds")?;
        to_json(&pins::delete_pins(conn, &actor, &ids))
    })
}

/// Anonymous: the PIN itself is the credential.
fn handle_pins_check_result(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let check: CheckRequest = parse_params(params, None)?;
        let view = pins::check_result(conn, &check).map_err(HandlerErr::from)?;
        to_json(&view)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "pins.issue" => Some(handle_pins_issue(state, req)),
        "pins.list" => Some(handle_pins_list(state, req)),
        "pins.attempts" => Some(handle_pins_attempts(state, req)),
        "pins.delete" => Some(handle_pins_delete(state, req)),
        "pins.checkResult" => Some(handle_pins_check_result(state, req)),
        _ => None,
    }
}

use crate::aggregate::{self, Scope};
use crate::ipc::helpers::{get_ids, get_optional_str, get_required_str, parse_actor, parse_params, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::results::{self, BulkResultAction, CreateResultInput, ResultFilter, UpdateResultInput};
use serde_json::{json, Value};

fn handle_results_create(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let input: CreateResultInput = parse_params(params, None)?;
        to_json(&results::create_result(conn, &actor, &input)?)
    })
}

fn handle_results_update(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        let input: UpdateResultInput = parse_params(params, None)?;
        to_json(&results::update_result(conn, &actor, &result_id, &input)?)
    })
}

fn handle_results_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        to_json(&results::get_result(conn, &actor, &result_id)?)
    })
}

fn handle_results_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let filter: ResultFilter = match params.get("filter") {
            Some(_) => parse_params(params, Some("filter"))?,
            None => ResultFilter::default(),
        };
        let rows = results::list_results(conn, &actor, &filter)?;
        Ok(json!({ "results": to_json(&rows)? }))
    })
}

fn handle_results_submit(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        to_json(&results::submit_result(conn, &actor, &result_id)?)
    })
}

fn handle_results_approve(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        to_json(&results::approve_result(conn, &actor, &result_id)?)
    })
}

fn handle_results_reject(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        let reason = get_optional_str(params, "reason").unwrap_or_default();
        to_json(&results::reject_result(conn, &actor, &result_id, &reason)?)
    })
}

fn handle_results_publish(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        to_json(&results::publish_result(conn, &actor, &result_id)?)
    })
}

fn handle_results_comment(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        let text = get_required_str(params, "text")?;
        to_json(&results::comment_result(conn, &actor, &result_id, &text)?)
    })
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let result_id = get_required_str(params, "resultId")?;
        results::delete_result(conn, &actor, &result_id)?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_results_bulk_action(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let ids = get_ids(params, "resultIds")?;
        let action: BulkResultAction = parse_params(params, Some("action"))?;
        let reason = get_optional_str(params, "reason");
        to_json(&results::bulk_action(conn, &actor, &ids, action, reason.as_deref()))
    })
}

fn handle_results_aggregate(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let scope: Scope = parse_params(params, None)?;
        to_json(&aggregate::aggregate_scope(conn, &actor, &scope)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "results.create" => Some(handle_results_create(state, req)),
        "results.update" => Some(handle_results_update(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.submit" => Some(handle_results_submit(state, req)),
        "results.approve" => Some(handle_results_approve(state, req)),
        "results.reject" => Some(handle_results_reject(state, req)),
        "results.publish" => Some(handle_results_publish(state, req)),
        "results.comment" => Some(handle_results_comment(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        "results.bulkAction" => Some(handle_results_bulk_action(state, req)),
        "results.aggregate" => Some(handle_results_aggregate(state, req)),
        _ => None,
    }
}

use crate::ipc::helpers::{get_ids, get_optional_str, get_required_str, parse_actor, parse_params, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::sheets::{self, BulkSheetAction, EntryInput, SheetFilter, SheetKey};
use serde_json::{json, Value};

fn handle_sheets_create(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let key: SheetKey = parse_params(params, None)?;
        let (sheet, resumed) = sheets::create_sheet(conn, &actor, &key)?;
        Ok(json!({ "sheet": to_json(&sheet)?, "resumed": resumed }))
    })
}

fn handle_sheets_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        to_json(&sheets::get_sheet(conn, &actor, &sheet_id)?)
    })
}

fn handle_sheets_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let filter: SheetFilter = match params.get("filter") {
            Some(_) => parse_params(params, Some("filter"))?,
            None => SheetFilter::default(),
        };
        let rows = sheets::list_sheets(conn, &actor, &filter)?;
        Ok(json!({ "sheets": to_json(&rows)? }))
    })
}

fn handle_sheets_update_entries(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        let entries: Vec<EntryInput> = parse_params(params, Some("entries"))?;
        to_json(&sheets::update_entries(conn, &actor, &sheet_id, &entries)?)
    })
}

fn handle_sheets_submit(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        to_json(&sheets::submit_sheet(conn, &actor, &sheet_id)?)
    })
}

fn handle_sheets_approve(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        to_json(&sheets::approve_sheet(conn, &actor, &sheet_id)?)
    })
}

fn handle_sheets_reject(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        let reason = get_optional_str(params, "reason").unwrap_or_default();
        to_json(&sheets::reject_sheet(conn, &actor, &sheet_id, &reason)?)
    })
}

fn handle_sheets_delete(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let sheet_id = get_required_str(params, "sheetId")?;
        sheets::delete_sheet(conn, &actor, &sheet_id)?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_sheets_bulk_action(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let ids = get_ids(params, "sheetIds")?;
        let action: BulkSheetAction = parse_params(params, Some("action"))?;
        to_json(&sheets::bulk_action(conn, &actor, &ids, action)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "sheets.create" => Some(handle_sheets_create(state, req)),
        "sheets.get" => Some(handle_sheets_get(state, req)),
        "sheets.list" => Some(handle_sheets_list(state, req)),
        "sheets.updateEntries" => Some(handle_sheets_update_entries(state, req)),
        "sheets.submit" => Some(handle_sheets_submit(state, req)),
        "sheets.approve" => Some(handle_sheets_approve(state, req)),
        "sheets.reject" => Some(handle_sheets_reject(state, req)),
        "sheets.delete" => Some(handle_sheets_delete(state, req)),
        "sheets.bulkAction" => Some(handle_sheets_bulk_action(state, req)),
        _ => None,
    }
}

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::actor::Actor;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};

/// Runs `f` against the open workspace and wraps its outcome in a response.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(id = %req.id, method = %req.method, code = error.code, "request failed");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_ids(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{key} must be an array")));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{key} must contain strings")))
        })
        .collect()
}

pub fn parse_actor(params: &Value) -> Result<Actor, HandlerErr> {
    let Some(raw) = params.get("actor") else {
        return Err(HandlerErr::bad_params("missing actor"));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid actor: {e}")))
}

/// Deserializes `params[key]`, or the whole params object when `key` is None.
pub fn parse_params<T: DeserializeOwned>(params: &Value, key: Option<&str>) -> Result<T, HandlerErr> {
    let raw = match key {
        Some(k) => params
            .get(k)
            .ok_or_else(|| HandlerErr::bad_params(format!("missing {k}")))?,
        None => params,
    };
    serde_json::from_value(raw.clone()).map_err(|e| match key {
        Some(k) => HandlerErr::bad_params(format!("invalid {k}: {e}")),
        None => HandlerErr::bad_params(e.to_string()),
    })
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "db_error",
        message: format!("failed to encode response: {e}"),
        details: None,
    })
}

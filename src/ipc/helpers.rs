use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use tracing::error;

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an integer", key)))
}

/// Reference time for rules that depend on the clock; hosts may pin it with `params.now`.
pub fn now_param(req: &Request) -> Result<i64, HandlerErr> {
    match req.params.get("now") {
        None | Some(serde_json::Value::Null) => Ok(chrono::Utc::now().timestamp()),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::new("bad_params", "now must be unix seconds")),
    }
}

pub fn db_err(code: &'static str, e: impl std::fmt::Display) -> HandlerErr {
    let message = e.to_string();
    error!(code, %message, "database error");
    HandlerErr::new(code, message)
}

/// `anyhow` errors carry their context chain into the message.
pub fn anyhow_err(code: &'static str, e: anyhow::Error) -> HandlerErr {
    db_err(code, format!("{e:#}"))
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

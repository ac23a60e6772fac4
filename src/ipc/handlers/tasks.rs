use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{load_draft_max_age_days, load_sentiment_settings};
use crate::ipc::helpers::{anyhow_err, db_conn, db_err, now_param, respond};
use crate::ipc::types::{AppState, Request};
use crate::sentiment::{classifier_from_settings, run_sentiment_pass};
use serde_json::json;
use tracing::info;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

fn tasks_sentiment(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let settings =
        load_sentiment_settings(conn).map_err(|e| anyhow_err("db_query_failed", e))?;
    if !settings.enabled {
        info!("sentiment analysis disabled; skipping pass");
        return Ok(json!({ "enabled": false, "found": 0, "updated": 0, "missing": 0 }));
    }
    let classifier =
        classifier_from_settings(&settings).map_err(|e| anyhow_err("sentiment_unavailable", e))?;
    let summary = run_sentiment_pass(
        conn,
        classifier.as_ref(),
        settings.batch_size,
        settings.max_comments,
    )
    .map_err(|e| anyhow_err("db_update_failed", e))?;

    Ok(json!({
        "enabled": true,
        "found": summary.found,
        "updated": summary.updated,
        "missing": summary.missing
    }))
}

fn tasks_clean_drafts(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let now = now_param(req)?;
    let max_age_days =
        load_draft_max_age_days(conn).map_err(|e| anyhow_err("db_query_failed", e))?;
    let cutoff = now - max_age_days * SECONDS_PER_DAY;

    let deleted = conn
        .execute("DELETE FROM drafts WHERE saved_at < ?", [cutoff])
        .map_err(|e| db_err("db_delete_failed", e))?;
    info!(deleted, max_age_days, "stale drafts removed");
    Ok(json!({ "deleted": deleted, "cutoff": cutoff }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.sentiment" => Some(respond(req, tasks_sentiment(state, req))),
        "tasks.cleanDrafts" => Some(respond(req, tasks_clean_drafts(state, req))),
        _ => None,
    }
}

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    anyhow_err, db_conn, db_err, now_param, optional_str, required_i64, required_str, respond,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{RatingStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

pub struct EvaluationRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub start_date: i64,
    pub end_date: i64,
}

pub fn load_evaluation(
    conn: &Connection,
    evaluation_id: &str,
) -> Result<EvaluationRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, description, start_date, end_date FROM evaluations WHERE id = ?",
        [evaluation_id],
        |r| {
            Ok(EvaluationRow {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
                start_date: r.get(3)?,
                end_date: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))?
    .ok_or_else(|| {
        HandlerErr::new("not_found", "evaluation not found")
            .with_details(json!({ "evaluationId": evaluation_id }))
    })
}

fn status_at(ev: &EvaluationRow, now: i64) -> &'static str {
    if now < ev.start_date {
        "notOpen"
    } else if now > ev.end_date {
        "closed"
    } else {
        "open"
    }
}

fn evaluations_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let description = optional_str(req, "description").unwrap_or_default();
    let start_date = required_i64(req, "startDate")?;
    let end_date = required_i64(req, "endDate")?;
    if end_date < start_date {
        return Err(HandlerErr::new("bad_params", "endDate must not be before startDate"));
    }
    let Some(questions) = req.params.get("questions").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "questions must be an array"));
    };
    let mut texts = Vec::with_capacity(questions.len());
    for (i, q) in questions.iter().enumerate() {
        let Some(text) = q.as_str() else {
            return Err(HandlerErr::new("bad_params", "questions must be strings")
                .with_details(json!({ "index": i })));
        };
        texts.push(text.trim().to_string());
    }

    let evaluation_id = uuid::Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO evaluations(id, name, description, start_date, end_date) VALUES(?, ?, ?, ?, ?)",
        (&evaluation_id, &name, &description, start_date, end_date),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    let mut question_ids: Vec<String> = Vec::new();
    for text in texts.into_iter().filter(|t| !t.is_empty()) {
        // Positions are 1-based over the questions actually kept.
        let sort_order = question_ids.len() as i64 + 1;
        let qid = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO questions(id, evaluation_id, sort_order, text) VALUES(?, ?, ?, ?)",
            (&qid, &evaluation_id, sort_order, &text),
        )
        .map_err(|e| db_err("db_insert_failed", e))?;
        question_ids.push(qid);
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    info!(evaluation_id = %evaluation_id, questions = question_ids.len(), "evaluation created");
    Ok(json!({
        "evaluationId": evaluation_id,
        "questionIds": question_ids
    }))
}

fn evaluations_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let now = now_param(req)?;
    let ev = load_evaluation(conn, &evaluation_id)?;
    let questions = SqliteStore::new(conn)
        .list_questions(&evaluation_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?;

    Ok(json!({
        "evaluation": {
            "id": ev.id,
            "name": ev.name,
            "description": ev.description,
            "startDate": ev.start_date,
            "endDate": ev.end_date
        },
        "questions": questions,
        "status": status_at(&ev, now)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.create" => Some(respond(req, evaluations_create(state, req))),
        "evaluations.get" => Some(respond(req, evaluations_get(state, req))),
        _ => None,
    }
}

use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::evaluations::load_evaluation;
use crate::ipc::handlers::groups::{group_of_student, submission_id_for};
use crate::ipc::handlers::setup::load_sentiment_settings;
use crate::ipc::helpers::{anyhow_err, db_conn, db_err, now_param, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::sentiment::{classifier_from_settings, DisabledClassifier, SentimentClassifier};
use crate::store::{RatingStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

const MIN_SCORE: i64 = 1;
const MAX_SCORE: i64 = 5;

struct ParsedAnswer {
    target_id: String,
    question_id: String,
    score: i64,
}

fn parse_ratings(
    req: &Request,
    member_ids: &HashSet<String>,
    question_ids: &HashSet<String>,
) -> Result<Vec<ParsedAnswer>, HandlerErr> {
    let Some(ratings) = req.params.get("ratings").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "ratings must be an object"));
    };
    let mut out = Vec::new();
    for (target_id, per_question) in ratings {
        if !member_ids.contains(target_id) {
            return Err(HandlerErr::new("bad_params", "rating target is not a group member")
                .with_details(json!({ "targetId": target_id })));
        }
        let Some(per_question) = per_question.as_object() else {
            return Err(HandlerErr::new("bad_params", "ratings per target must be an object")
                .with_details(json!({ "targetId": target_id })));
        };
        for (question_id, score) in per_question {
            if !question_ids.contains(question_id) {
                return Err(HandlerErr::new("bad_params", "unknown question")
                    .with_details(json!({ "questionId": question_id })));
            }
            let score = score
                .as_i64()
                .filter(|s| (MIN_SCORE..=MAX_SCORE).contains(s))
                .ok_or_else(|| {
                    HandlerErr::new(
                        "bad_params",
                        format!("score must be an integer in {}..={}", MIN_SCORE, MAX_SCORE),
                    )
                    .with_details(json!({ "targetId": target_id, "questionId": question_id }))
                })?;
            out.push(ParsedAnswer {
                target_id: target_id.clone(),
                question_id: question_id.clone(),
                score,
            });
        }
    }
    Ok(out)
}

/// target id -> comment text; blank comments are dropped.
fn parse_comments(
    req: &Request,
    member_ids: &HashSet<String>,
) -> Result<BTreeMap<String, String>, HandlerErr> {
    let mut out = BTreeMap::new();
    let Some(raw) = req.params.get("comments") else {
        return Ok(out);
    };
    if raw.is_null() {
        return Ok(out);
    }
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new("bad_params", "comments must be an object"));
    };
    for (target_id, text) in obj {
        if !member_ids.contains(target_id) {
            return Err(HandlerErr::new("bad_params", "comment target is not a group member")
                .with_details(json!({ "targetId": target_id })));
        }
        let Some(text) = text.as_str() else {
            return Err(HandlerErr::new("bad_params", "comment must be a string")
                .with_details(json!({ "targetId": target_id })));
        };
        let text = text.trim();
        if !text.is_empty() {
            out.insert(target_id.clone(), text.to_string());
        }
    }
    Ok(out)
}

fn classifier_for(conn: &Connection) -> Box<dyn SentimentClassifier> {
    let built = load_sentiment_settings(conn).and_then(|s| classifier_from_settings(&s));
    match built {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "sentiment classifier unavailable");
            Box::new(DisabledClassifier)
        }
    }
}

fn submissions_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_id = required_str(req, "studentId")?;
    let now = now_param(req)?;
    let ev = load_evaluation(conn, &evaluation_id)?;

    let Some(group_id) = group_of_student(conn, &evaluation_id, &student_id)? else {
        return Err(HandlerErr::new("group_not_found", "student is not in a group for this evaluation")
            .with_details(json!({ "evaluationId": evaluation_id, "studentId": student_id })));
    };
    let existing = submission_id_for(conn, &evaluation_id, &student_id)?;
    if let Some((_, Some(_))) = existing {
        return Err(HandlerErr::new("already_submitted", "a final submission already exists"));
    }
    if now > ev.end_date {
        return Err(HandlerErr::new("evaluation_ended", "the evaluation has ended")
            .with_details(json!({ "endDate": ev.end_date })));
    }

    let store = SqliteStore::new(conn);
    let member_ids: HashSet<String> = store
        .list_members(&group_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?
        .into_iter()
        .map(|m| m.id)
        .collect();
    let question_ids: HashSet<String> = store
        .list_questions(&evaluation_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?
        .into_iter()
        .map(|q| q.id)
        .collect();

    let answers = parse_ratings(req, &member_ids, &question_ids)?;
    let comments = parse_comments(req, &member_ids)?;
    let reflection = req
        .params
        .get("reflection")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    // Comment ids are assigned up front so the classifier can key on them.
    let comment_rows: Vec<(String, String, String)> = comments
        .into_iter()
        .map(|(target, text)| (uuid::Uuid::new_v4().to_string(), target, text))
        .collect();
    let batch: BTreeMap<String, String> = comment_rows
        .iter()
        .map(|(id, _, text)| (id.clone(), text.clone()))
        .collect();
    let labels = classifier_for(conn).classify_batch(&batch);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    let submission_id = match existing {
        Some((id, None)) => {
            tx.execute(
                "UPDATE submissions SET last_saved_at = ?, submitted_at = ?, reflection = ? WHERE id = ?",
                (now, now, &reflection, &id),
            )
            .map_err(|e| db_err("db_update_failed", e))?;
            tx.execute("DELETE FROM answers WHERE submission_id = ?", [&id])
                .map_err(|e| db_err("db_delete_failed", e))?;
            tx.execute("DELETE FROM comments WHERE submission_id = ?", [&id])
                .map_err(|e| db_err("db_delete_failed", e))?;
            id
        }
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO submissions(id, evaluation_id, student_id, last_saved_at, submitted_at, reflection)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, &evaluation_id, &student_id, now, now, &reflection),
            )
            .map_err(|e| db_err("db_insert_failed", e))?;
            id
        }
    };

    {
        let mut insert_answer = tx
            .prepare(
                "INSERT INTO answers(submission_id, question_id, target_id, score) VALUES(?, ?, ?, ?)",
            )
            .map_err(|e| db_err("db_insert_failed", e))?;
        for a in &answers {
            insert_answer
                .execute((&submission_id, &a.question_id, &a.target_id, a.score))
                .map_err(|e| db_err("db_insert_failed", e))?;
        }

        let mut insert_comment = tx
            .prepare(
                "INSERT INTO comments(id, submission_id, target_id, comment, sentiment) VALUES(?, ?, ?, ?, ?)",
            )
            .map_err(|e| db_err("db_insert_failed", e))?;
        for (id, target_id, text) in &comment_rows {
            let sentiment = labels.get(id).map(|s| s.as_str());
            insert_comment
                .execute((id, &submission_id, target_id, text, sentiment))
                .map_err(|e| db_err("db_insert_failed", e))?;
        }
    }

    tx.execute(
        "DELETE FROM drafts WHERE evaluation_id = ? AND student_id = ?",
        (&evaluation_id, &student_id),
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    info!(
        submission_id = %submission_id,
        answers = answers.len(),
        comments = comment_rows.len(),
        classified = labels.len(),
        "submission saved"
    );
    Ok(json!({
        "submissionId": submission_id,
        "sentimentsClassified": labels.len()
    }))
}

fn drafts_save(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_id = required_str(req, "studentId")?;
    let now = now_param(req)?;
    let Some(data) = req.params.get("data") else {
        return Err(HandlerErr::new("bad_params", "missing data"));
    };
    load_evaluation(conn, &evaluation_id)?;
    if let Some((_, Some(_))) = submission_id_for(conn, &evaluation_id, &student_id)? {
        return Err(HandlerErr::new("already_submitted", "a final submission already exists"));
    }

    let raw = serde_json::to_string(data).map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    conn.execute(
        "INSERT INTO drafts(evaluation_id, student_id, data, saved_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(evaluation_id, student_id) DO UPDATE SET
           data = excluded.data,
           saved_at = excluded.saved_at",
        (&evaluation_id, &student_id, &raw, now),
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    Ok(json!({ "savedAt": now }))
}

fn drafts_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_id = required_str(req, "studentId")?;
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT data, saved_at FROM drafts WHERE evaluation_id = ? AND student_id = ?",
            (&evaluation_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;

    let Some((raw, saved_at)) = row else {
        return Ok(json!({ "data": null, "savedAt": null }));
    };
    let data: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(evaluation_id = %evaluation_id, student_id = %student_id, error = %e, "discarding unreadable draft");
            serde_json::Value::Null
        }
    };
    Ok(json!({ "data": data, "savedAt": saved_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.submit" => Some(respond(req, submissions_submit(state, req))),
        "drafts.save" => Some(respond(req, drafts_save(state, req))),
        "drafts.get" => Some(respond(req, drafts_get(state, req))),
        _ => None,
    }
}

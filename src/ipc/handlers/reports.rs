use crate::export::{export_evaluation_archive, team_report_file_name, write_csv_file};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::evaluations::load_evaluation;
use crate::ipc::helpers::{anyhow_err, db_conn, db_err, now_param, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::matrix::round_to;
use crate::model::GroupMember;
use crate::report::{generate_team_report, TeamReport};
use crate::store::{RatingStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

fn team_report(
    conn: &Connection,
    evaluation_id: &str,
    group_id: &str,
) -> Result<TeamReport, HandlerErr> {
    generate_team_report(&SqliteStore::new(conn), evaluation_id, group_id)
        .map_err(|e| anyhow_err("db_query_failed", e))
}

fn reports_team_grid(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let group_id = required_str(req, "groupId")?;
    let report = team_report(conn, &evaluation_id, &group_id)?;

    Ok(json!({
        "groupName": report.group.as_ref().map(|g| g.name.clone()),
        "outcome": report.outcome,
        "rowCount": report.rows.len(),
        "rows": report.rows
    }))
}

fn reports_team_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let group_id = required_str(req, "groupId")?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let report = team_report(conn, &evaluation_id, &group_id)?;

    let file_name = team_report_file_name(
        report
            .group
            .as_ref()
            .map(|g| g.name.as_str())
            .unwrap_or(group_id.as_str()),
    );
    write_csv_file(&out_path, &report.rows).map_err(|e| anyhow_err("io_failed", e))?;

    info!(path = %out_path.to_string_lossy(), rows = report.rows.len(), "team report written");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "fileName": file_name,
        "rowCount": report.rows.len(),
        "outcome": report.outcome
    }))
}

fn reports_export_all(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    load_evaluation(conn, &evaluation_id)?;

    let summary = export_evaluation_archive(&SqliteStore::new(conn), &evaluation_id, &out_path)
        .map_err(|e| anyhow_err(e.code, e.error))?;

    info!(
        path = %out_path.to_string_lossy(),
        entries = summary.entries.len(),
        "evaluation archive written"
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "entries": summary.entries
    }))
}

/// Submitter first, the rest in roster order.
fn self_first(mut members: Vec<GroupMember>, self_id: &str) -> Vec<GroupMember> {
    if let Some(pos) = members.iter().position(|m| m.id == self_id) {
        let me = members.remove(pos);
        members.insert(0, me);
    }
    members
}

struct SubmissionRow {
    id: String,
    student_id: String,
    submitted_at: Option<i64>,
    reflection: String,
}

fn reports_submission_model(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let group_id = required_str(req, "groupId")?;
    let submission_id = required_str(req, "submissionId")?;
    let now = now_param(req)?;

    let ev = load_evaluation(conn, &evaluation_id)?;
    if now <= ev.end_date {
        return Err(HandlerErr::new("not_ended", "results are available once the evaluation has ended")
            .with_details(json!({ "endDate": ev.end_date })));
    }

    let submission = conn
        .query_row(
            "SELECT id, student_id, submitted_at, reflection
             FROM submissions
             WHERE id = ? AND evaluation_id = ?",
            (&submission_id, &evaluation_id),
            |r| {
                Ok(SubmissionRow {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    submitted_at: r.get(2)?,
                    reflection: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "submission not found"))?;
    if submission.submitted_at.is_none() {
        return Err(HandlerErr::new("not_submitted", "submission is not final"));
    }

    let store = SqliteStore::new(conn);
    let group = store
        .find_group(&evaluation_id, &group_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "group not found"))?;
    let members = store
        .list_members(&group.id)
        .map_err(|e| anyhow_err("db_query_failed", e))?;
    let questions = store
        .list_questions(&evaluation_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?;

    let mut scores: HashMap<(String, String), i64> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT target_id, question_id, score FROM answers WHERE submission_id = ?")
            .map_err(|e| db_err("db_query_failed", e))?;
        let rows = stmt
            .query_map([&submission.id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
            })
            .map_err(|e| db_err("db_query_failed", e))?;
        for row in rows {
            let (target, question, score) = row.map_err(|e| db_err("db_query_failed", e))?;
            scores.insert((target, question), score);
        }
    }
    let mut comments: HashMap<String, (String, Option<String>)> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT target_id, comment, sentiment FROM comments WHERE submission_id = ?")
            .map_err(|e| db_err("db_query_failed", e))?;
        let rows = stmt
            .query_map([&submission.id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| db_err("db_query_failed", e))?;
        for row in rows {
            let (target, text, sentiment) = row.map_err(|e| db_err("db_query_failed", e))?;
            comments.insert(target, (text, sentiment));
        }
    }

    let mut out = Vec::with_capacity(members.len());
    for m in self_first(members, &submission.student_id) {
        let is_self = m.id == submission.student_id;
        let mut criteria = Vec::with_capacity(questions.len());
        let mut present = Vec::new();
        for q in &questions {
            let score = scores.get(&(m.id.clone(), q.id.clone())).copied();
            if let Some(s) = score {
                present.push(s as f64);
            }
            criteria.push(json!({
                "label": format!("Criteria {}", q.sort_order),
                "score": score,
                "tooltip": q.text
            }));
        }
        let average = if present.is_empty() {
            None
        } else {
            Some(round_to(present.iter().sum::<f64>() / present.len() as f64, 1))
        };
        let (comment, sentiment) = match comments.remove(&m.id) {
            Some((c, s)) => (Some(c), s),
            None => (None, None),
        };
        let reflection = is_self.then(|| submission.reflection.clone());
        out.push(json!({
            "studentId": m.id,
            "name": m.display_name(),
            "isSelf": is_self,
            "criteria": criteria,
            "average": average,
            "comment": comment,
            "sentiment": sentiment,
            "reflection": reflection
        }));
    }

    Ok(json!({
        "evaluationName": ev.name,
        "groupName": group.name,
        "submissionId": submission.id,
        "members": out
    }))
}

fn reports_comments_model(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_id = required_str(req, "studentId")?;
    let ev = load_evaluation(conn, &evaluation_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.student_id, st.last_name, st.first_name, c.comment, c.sentiment, s.reflection
             FROM comments c
             JOIN submissions s ON s.id = c.submission_id
             JOIN students st ON st.id = s.student_id
             WHERE s.evaluation_id = ?
               AND c.target_id = ?
               AND s.submitted_at IS NOT NULL",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let mut rows = stmt
        .query_map((&evaluation_id, &student_id), |r| {
            Ok((
                GroupMember {
                    id: r.get(0)?,
                    last_name: r.get(1)?,
                    first_name: r.get(2)?,
                    id_number: None,
                },
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .map_err(|e| db_err("db_query_failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| db_err("db_query_failed", e))?;

    rows.sort_by(|a, b| {
        let a_self = a.0.id == student_id;
        let b_self = b.0.id == student_id;
        b_self
            .cmp(&a_self)
            .then_with(|| a.0.last_name.cmp(&b.0.last_name))
            .then_with(|| a.0.first_name.cmp(&b.0.first_name))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let comments: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(author, comment, sentiment, reflection)| {
            let is_self = author.id == student_id;
            let reflection = is_self.then_some(reflection);
            json!({
                "authorId": author.id,
                "authorName": author.display_name(),
                "isSelf": is_self,
                "comment": comment,
                "sentiment": sentiment,
                "reflection": reflection
            })
        })
        .collect();

    Ok(json!({
        "evaluationName": ev.name,
        "studentId": student_id,
        "comments": comments
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.teamGrid" => Some(respond(req, reports_team_grid(state, req))),
        "reports.teamCsv" => Some(respond(req, reports_team_csv(state, req))),
        "reports.exportAll" => Some(respond(req, reports_export_all(state, req))),
        "reports.submissionModel" => Some(respond(req, reports_submission_model(state, req))),
        "reports.commentsModel" => Some(respond(req, reports_comments_model(state, req))),
        _ => None,
    }
}

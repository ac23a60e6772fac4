use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::evaluations::load_evaluation;
use crate::ipc::helpers::{anyhow_err, db_conn, db_err, optional_str, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::store::{RatingStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

fn member_str(m: &serde_json::Value, key: &str) -> Option<String> {
    m.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn submission_id_for(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
) -> Result<Option<(String, Option<i64>)>, HandlerErr> {
    conn.query_row(
        "SELECT id, submitted_at FROM submissions WHERE evaluation_id = ? AND student_id = ?",
        (evaluation_id, student_id),
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<i64>>(1)?)),
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

/// The group of `evaluation_id` that lists `student_id` as a member.
pub fn group_of_student(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT g.id
         FROM evaluation_groups g
         JOIN group_members gm ON gm.group_id = g.id
         WHERE g.evaluation_id = ? AND gm.student_id = ?
         ORDER BY g.name, g.id
         LIMIT 1",
        (evaluation_id, student_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

fn groups_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let name = required_str(req, "name")?;
    let team_number = optional_str(req, "teamNumber");
    load_evaluation(conn, &evaluation_id)?;

    let Some(members) = req.params.get("members").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "members must be an array"));
    };

    let group_id = uuid::Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO evaluation_groups(id, evaluation_id, name, team_number) VALUES(?, ?, ?, ?)",
        (&group_id, &evaluation_id, &name, &team_number),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    let mut member_ids = Vec::with_capacity(members.len());
    for (i, m) in members.iter().enumerate() {
        let (Some(last_name), Some(first_name)) =
            (member_str(m, "lastName"), member_str(m, "firstName"))
        else {
            return Err(HandlerErr::new("bad_params", "member lastName and firstName are required")
                .with_details(json!({ "index": i })));
        };
        let student_id =
            member_str(m, "id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO students(id, last_name, first_name, id_number, email)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               last_name = excluded.last_name,
               first_name = excluded.first_name,
               id_number = COALESCE(excluded.id_number, students.id_number),
               email = COALESCE(excluded.email, students.email)",
            (
                &student_id,
                &last_name,
                &first_name,
                member_str(m, "idNumber"),
                member_str(m, "email"),
            ),
        )
        .map_err(|e| db_err("db_insert_failed", e))?;
        tx.execute(
            "INSERT OR IGNORE INTO group_members(group_id, student_id) VALUES(?, ?)",
            (&group_id, &student_id),
        )
        .map_err(|e| db_err("db_insert_failed", e))?;
        member_ids.push(student_id);
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    info!(group_id = %group_id, members = member_ids.len(), "group created");
    Ok(json!({
        "groupId": group_id,
        "memberIds": member_ids
    }))
}

fn groups_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let groups = SqliteStore::new(conn)
        .list_groups(&evaluation_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?;

    let mut count_stmt = conn
        .prepare(
            "SELECT COUNT(*), COUNT(s.submitted_at)
             FROM group_members gm
             LEFT JOIN submissions s
               ON s.student_id = gm.student_id AND s.evaluation_id = ?
             WHERE gm.group_id = ?",
        )
        .map_err(|e| db_err("db_query_failed", e))?;

    let mut out = Vec::with_capacity(groups.len());
    for g in groups {
        let (member_count, submitted_count): (i64, i64) = count_stmt
            .query_row((&evaluation_id, &g.id), |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(|e| db_err("db_query_failed", e))?;
        out.push(json!({
            "id": g.id,
            "name": g.name,
            "teamNumber": g.team_number,
            "memberCount": member_count,
            "submittedCount": submitted_count
        }));
    }
    Ok(json!({ "groups": out }))
}

fn groups_members(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let group_id = required_str(req, "groupId")?;
    let store = SqliteStore::new(conn);
    let group = store
        .find_group(&evaluation_id, &group_id)
        .map_err(|e| anyhow_err("db_query_failed", e))?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "group not found")
                .with_details(json!({ "groupId": group_id }))
        })?;
    let members = store
        .list_members(&group.id)
        .map_err(|e| anyhow_err("db_query_failed", e))?;

    let mut out = Vec::with_capacity(members.len());
    for m in members {
        let (submission_id, submitted) = match submission_id_for(conn, &evaluation_id, &m.id)? {
            Some((id, at)) => (Some(id), at.is_some()),
            None => (None, false),
        };
        out.push(json!({
            "id": m.id,
            "lastName": m.last_name,
            "firstName": m.first_name,
            "idNumber": m.id_number,
            "submissionId": submission_id,
            "submitted": submitted
        }));
    }
    Ok(json!({
        "group": group,
        "members": out
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(respond(req, groups_create(state, req))),
        "groups.list" => Some(respond(req, groups_list(state, req))),
        "groups.members" => Some(respond(req, groups_members(state, req))),
        _ => None,
    }
}

#[path = "../src/db.rs"]
mod db;
#[path = "../src/model.rs"]
mod model;
#[path = "../src/store.rs"]
mod store;

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use store::{RatingStore, SqliteStore};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// Workspace laid out before groups carried a team number.
fn write_legacy_workspace(workspace: &Path) {
    let conn = Connection::open(workspace.join(db::DB_FILE_NAME)).expect("open legacy db");
    conn.execute_batch(
        "CREATE TABLE evaluations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            start_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL
         );
         CREATE TABLE students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            id_number TEXT,
            email TEXT
         );
         CREATE TABLE evaluation_groups(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            name TEXT NOT NULL
         );
         CREATE TABLE group_members(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(group_id, student_id)
         );
         INSERT INTO evaluations(id, name, start_date, end_date) VALUES('ev1', 'Legacy', 0, 100);
         INSERT INTO students(id, last_name, first_name) VALUES('a', 'Adams', 'Ann');
         INSERT INTO evaluation_groups(id, evaluation_id, name) VALUES('g-old', 'ev1', 'Old Team');
         INSERT INTO group_members(group_id, student_id) VALUES('g-old', 'a');",
    )
    .expect("seed legacy schema");
}

fn column_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .expect("prepare pragma");
    let names = stmt
        .query_map([], |r| r.get::<_, String>(1))
        .expect("query pragma")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect columns");
    names
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_smartsped");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn smartsped");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn legacy_groups_gain_team_number_column_in_place() {
    let workspace = temp_dir("smartspe-db-migration");
    write_legacy_workspace(&workspace);

    let conn = db::open_db(&workspace).expect("open migrated db");
    assert!(column_names(&conn, "evaluation_groups").contains(&"team_number".to_string()));

    let store = SqliteStore::new(&conn);
    let group = store
        .find_group("ev1", "g-old")
        .expect("find group")
        .expect("legacy group kept");
    assert_eq!(group.team_number, None);
    assert_eq!(group.team_label(), "g-old");
    let members = store.list_members("g-old").expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].last_name, "Adams");
    drop(conn);

    // Opening again is a no-op for the migration.
    let conn = db::open_db(&workspace).expect("reopen db");
    let count = column_names(&conn, "evaluation_groups")
        .iter()
        .filter(|c| c.as_str() == "team_number")
        .count();
    assert_eq!(count, 1);
    drop(conn);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_workspace_is_usable_over_ipc() {
    let workspace = temp_dir("smartspe-db-migration-ipc");
    write_legacy_workspace(&workspace);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let groups = request_ok(
        &mut stdin,
        &mut reader,
        "gl",
        "groups.list",
        json!({ "evaluationId": "ev1" }),
    );
    let list = groups["groups"].as_array().expect("groups");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], "g-old");
    assert!(list[0]["teamNumber"].is_null());
    assert_eq!(list[0]["memberCount"], 1);
    assert_eq!(list[0]["submittedCount"], 0);

    let _ = std::fs::remove_dir_all(workspace);
}

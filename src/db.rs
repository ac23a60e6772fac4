use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "smartspe.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            start_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            text TEXT NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_evaluation ON questions(evaluation_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            id_number TEXT,
            email TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_groups(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;
    // Workspaces created before team numbers existed fall back to the group id.
    ensure_groups_team_number(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_evaluation ON evaluation_groups(evaluation_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(group_id, student_id),
            FOREIGN KEY(group_id) REFERENCES evaluation_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_members_student ON group_members(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            last_saved_at INTEGER NOT NULL,
            submitted_at INTEGER,
            reflection TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(evaluation_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            submission_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            score INTEGER NOT NULL,
            PRIMARY KEY(submission_id, target_id, question_id),
            FOREIGN KEY(submission_id) REFERENCES submissions(id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(target_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_target ON answers(target_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS comments(
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            comment TEXT NOT NULL,
            sentiment TEXT,
            FOREIGN KEY(submission_id) REFERENCES submissions(id),
            FOREIGN KEY(target_id) REFERENCES students(id),
            UNIQUE(submission_id, target_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_comments_target ON comments(target_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS drafts(
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            data TEXT NOT NULL,
            saved_at INTEGER NOT NULL,
            PRIMARY KEY(evaluation_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_groups_team_number(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "evaluation_groups", "team_number")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE evaluation_groups ADD COLUMN team_number TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_schema_has_team_numbers() {
        let conn = open_in_memory().expect("db");
        assert!(table_has_column(&conn, "evaluation_groups", "team_number").expect("pragma"));
        assert!(!table_has_column(&conn, "evaluation_groups", "nope").expect("pragma"));
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = open_in_memory().expect("db");
        assert_eq!(settings_get_json(&conn, "setup.drafts").expect("get"), None);
        settings_set_json(&conn, "setup.drafts", &serde_json::json!({ "maxAgeDays": 7 }))
            .expect("set");
        settings_set_json(&conn, "setup.drafts", &serde_json::json!({ "maxAgeDays": 9 }))
            .expect("overwrite");
        assert_eq!(
            settings_get_json(&conn, "setup.drafts").expect("get"),
            Some(serde_json::json!({ "maxAgeDays": 9 }))
        );
    }
}

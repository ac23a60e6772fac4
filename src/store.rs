use crate::model::{sort_members, sort_questions, Group, GroupMember, Question};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};

/// Read access to persisted evaluation data, as the report engine needs it.
pub trait RatingStore {
    fn find_group(&self, evaluation_id: &str, group_id: &str) -> anyhow::Result<Option<Group>>;
    fn list_groups(&self, evaluation_id: &str) -> anyhow::Result<Vec<Group>>;
    /// Members in roster order.
    fn list_members(&self, group_id: &str) -> anyhow::Result<Vec<GroupMember>>;
    /// Questions in sort order.
    fn list_questions(&self, evaluation_id: &str) -> anyhow::Result<Vec<Question>>;
    fn get_score(
        &self,
        evaluation_id: &str,
        rater_id: &str,
        target_id: &str,
        question_id: &str,
    ) -> anyhow::Result<Option<i64>>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn group_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: r.get(0)?,
        evaluation_id: r.get(1)?,
        name: r.get(2)?,
        team_number: r.get(3)?,
    })
}

impl RatingStore for SqliteStore<'_> {
    fn find_group(&self, evaluation_id: &str, group_id: &str) -> anyhow::Result<Option<Group>> {
        self.conn
            .query_row(
                "SELECT id, evaluation_id, name, team_number
                 FROM evaluation_groups
                 WHERE id = ? AND evaluation_id = ?",
                (group_id, evaluation_id),
                group_from_row,
            )
            .optional()
            .context("failed to load group")
    }

    fn list_groups(&self, evaluation_id: &str) -> anyhow::Result<Vec<Group>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, evaluation_id, name, team_number
             FROM evaluation_groups
             WHERE evaluation_id = ?
             ORDER BY name, id",
        )?;
        let groups = stmt
            .query_map([evaluation_id], group_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to list groups")?;
        Ok(groups)
    }

    fn list_members(&self, group_id: &str) -> anyhow::Result<Vec<GroupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.last_name, s.first_name, s.id_number
             FROM group_members gm
             JOIN students s ON s.id = gm.student_id
             WHERE gm.group_id = ?",
        )?;
        let mut members = stmt
            .query_map([group_id], |r| {
                Ok(GroupMember {
                    id: r.get(0)?,
                    last_name: r.get(1)?,
                    first_name: r.get(2)?,
                    id_number: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to list group members")?;
        // Sorted here rather than in SQL so the order does not depend on collation.
        sort_members(&mut members);
        Ok(members)
    }

    fn list_questions(&self, evaluation_id: &str) -> anyhow::Result<Vec<Question>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, sort_order
             FROM questions
             WHERE evaluation_id = ?",
        )?;
        let mut questions = stmt
            .query_map([evaluation_id], |r| {
                Ok(Question {
                    id: r.get(0)?,
                    text: r.get(1)?,
                    sort_order: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to list questions")?;
        sort_questions(&mut questions);
        Ok(questions)
    }

    fn get_score(
        &self,
        evaluation_id: &str,
        rater_id: &str,
        target_id: &str,
        question_id: &str,
    ) -> anyhow::Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT a.score
             FROM answers a
             JOIN submissions s ON s.id = a.submission_id
             WHERE s.evaluation_id = ?
               AND s.student_id = ?
               AND a.target_id = ?
               AND a.question_id = ?",
        )?;
        let score = stmt
            .query_row((evaluation_id, rater_id, target_id, question_id), |r| {
                r.get::<_, Option<i64>>(0)
            })
            .optional()
            .context("failed to load score")?;
        Ok(score.flatten())
    }
}

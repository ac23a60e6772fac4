//! Team report assembly.
//!
//! A team report is the roster block (team, student ids, names) on the left and
//! every member's rating sub-table merged side by side on the right. Row and
//! column positions follow the institutional spreadsheet template exactly:
//!
//! ```text
//! row 0  title
//! row 1
//! row 2  "Student being assessed"   <gap> target names
//! row 3  "Assessment criteria"      <gap> Q1..Qn, Average for each
//! row 4  TEAM # | Student ID | ...        (spacer)
//! row 5+ one roster row per member  <2>   rating rows, one per rater
//! label  "Average of Criteria"      <5>   per-question averages
//! ```

use crate::matrix::{blank_row, build_group_matrices, merge_side_by_side, text_row, Row, Table};
use crate::model::{Group, GroupMember};
use crate::store::RatingStore;
use serde::Serialize;

/// Blank columns between the roster block and the names/questions rows.
pub const GAP_AFTER_ROSTER: usize = 1;
/// Blank columns between a roster row and its rating values (rows >= [`FIRST_VALUE_ROW`]).
pub const GAP_BEFORE_RATINGS_IN_VALUE_ROWS: usize = 2;
/// Blank columns after the "Average of Criteria" label.
pub const LABEL_ROW_GAP: usize = 5;
pub const FIRST_VALUE_ROW: usize = 5;
/// Blank columns between two members' sub-tables.
pub const SUBTABLE_GAP: usize = 1;

const NAMES_ROW: usize = 2;
const QUESTIONS_ROW: usize = 3;
const SPACER_ROW: usize = 4;
const TRAILING_BLANK_ROWS: usize = 2;

pub const REPORT_HEADING: &str = "SMARTSPE Report";
pub const STUDENT_BEING_ASSESSED: &str = "Student being assessed";
pub const ASSESSMENT_CRITERIA: &str = "Assessment criteria";
pub const AVERAGE_OF_CRITERIA: &str = "Average of Criteria";
pub const ROSTER_HEADER: [&str; 4] = ["TEAM #", "Student ID", "Surname", "Given Name"];
pub const NO_MEMBERS_MESSAGE: &str = "No members found for this group.";
pub const NO_QUESTIONS_MESSAGE: &str = "No questions (assessment criteria) defined for this SPE.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportOutcome {
    Complete,
    NoGroup,
    NoMembers,
    NoQuestions,
}

#[derive(Debug, Clone)]
pub struct TeamReport {
    pub group: Option<Group>,
    pub outcome: ReportOutcome,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct Roster {
    pub rows: Vec<Row>,
    /// Index of the "Average of Criteria" row.
    pub label_row: usize,
}

fn title_row(evaluation_id: &str, group: &Group) -> Row {
    text_row([format!(
        "{} for SPE ID: {} - Team: {}",
        REPORT_HEADING, evaluation_id, group.name
    )])
}

/// Identity block for a team with at least one member.
pub fn roster_block(evaluation_id: &str, group: &Group, members: &[GroupMember]) -> Roster {
    let mut rows: Vec<Row> = Vec::with_capacity(members.len() + 7);
    rows.push(title_row(evaluation_id, group));
    rows.push(Vec::new());
    rows.push(text_row([STUDENT_BEING_ASSESSED]));
    rows.push(text_row([ASSESSMENT_CRITERIA]));
    rows.push(text_row(ROSTER_HEADER));

    let team = group.team_label();
    for m in members {
        rows.push(text_row([
            team,
            m.student_id(),
            m.last_name.as_str(),
            m.first_name.as_str(),
        ]));
    }

    rows.push(text_row([AVERAGE_OF_CRITERIA]));
    let label_row = rows.len() - 1;
    rows.push(Vec::new());

    Roster { rows, label_row }
}

/// Merges the roster block with the side-by-side ratings block.
///
/// Ratings row 0 (names) lands on row 2 and row 1 (question headers) on row 3,
/// both left-padded past the widest roster row plus [`GAP_AFTER_ROSTER`]. Row 4
/// is a blank spacer. Value rows start at [`FIRST_VALUE_ROW`] and are offset
/// only by the gap inserted at merge time, so they line up with the header
/// rows given the roster row lengths of the template.
pub fn assemble(roster: &[Row], ratings: &Table, label_row: Option<usize>) -> Vec<Row> {
    let roster_width = roster.iter().map(Vec::len).max().unwrap_or(0);
    let lead = roster_width + GAP_AFTER_ROSTER;

    // Ratings rows 2.. are the per-rater rows followed by the averages row.
    let value_rows: &[Row] = ratings.rows.get(2..).unwrap_or(&[]);
    let value_width = value_rows.first().map(Vec::len).unwrap_or(0);

    let needed_rows = roster.len().max(FIRST_VALUE_ROW + value_rows.len());
    let mut shifted: Vec<Row> = vec![Vec::new(); needed_rows];

    for (slot, src) in [(NAMES_ROW, 0usize), (QUESTIONS_ROW, 1usize)] {
        let mut row = blank_row(lead);
        if let Some(r) = ratings.rows.get(src) {
            row.extend(r.iter().cloned());
        }
        shifted[slot] = row;
    }
    shifted[SPACER_ROW] = blank_row(value_width);
    for (i, r) in value_rows.iter().enumerate() {
        shifted[FIRST_VALUE_ROW + i] = r.clone();
    }

    let mut out: Vec<Row> = Vec::with_capacity(needed_rows + TRAILING_BLANK_ROWS);
    for (i, tail) in shifted.into_iter().enumerate() {
        let gap = if label_row == Some(i) {
            LABEL_ROW_GAP
        } else if i >= FIRST_VALUE_ROW {
            GAP_BEFORE_RATINGS_IN_VALUE_ROWS
        } else {
            0
        };
        let mut row = roster.get(i).cloned().unwrap_or_default();
        row.extend(blank_row(gap));
        row.extend(tail);
        out.push(row);
    }
    for _ in 0..TRAILING_BLANK_ROWS {
        out.push(Vec::new());
    }
    out
}

/// Builds the full report grid for one team.
///
/// Missing group, members or questions yield a short explanatory report
/// instead of a grid; only storage failures are returned as errors.
pub fn generate_team_report<S>(
    store: &S,
    evaluation_id: &str,
    group_id: &str,
) -> anyhow::Result<TeamReport>
where
    S: RatingStore + ?Sized,
{
    let Some(group) = store.find_group(evaluation_id, group_id)? else {
        return Ok(TeamReport {
            group: None,
            outcome: ReportOutcome::NoGroup,
            rows: vec![
                text_row([REPORT_HEADING]),
                text_row([format!(
                    "No group found for SPE ID: {}, Group ID: {}",
                    evaluation_id, group_id
                )]),
            ],
        });
    };

    let members = store.list_members(&group.id)?;
    if members.is_empty() {
        let mut rows = vec![title_row(evaluation_id, &group), Vec::new()];
        rows.push(text_row([STUDENT_BEING_ASSESSED, "", "", ""]));
        let mut header = text_row([ASSESSMENT_CRITERIA]);
        header.extend(text_row(ROSTER_HEADER));
        rows.push(header);
        rows.push(text_row([NO_MEMBERS_MESSAGE]));
        return Ok(TeamReport {
            group: Some(group),
            outcome: ReportOutcome::NoMembers,
            rows,
        });
    }

    let roster = roster_block(evaluation_id, &group, &members);

    let questions = store.list_questions(evaluation_id)?;
    if questions.is_empty() {
        let mut rows = roster.rows;
        rows.push(text_row([NO_QUESTIONS_MESSAGE]));
        return Ok(TeamReport {
            group: Some(group),
            outcome: ReportOutcome::NoQuestions,
            rows,
        });
    }

    let mut matrices = build_group_matrices(&members, &questions, |rater, target, question| {
        store.get_score(evaluation_id, &rater.id, &target.id, &question.id)
    })?;
    let width = questions.len() + 1;
    for m in &mut matrices {
        m.pad_to(width);
    }
    let ratings = merge_side_by_side(&matrices, SUBTABLE_GAP);
    let rows = assemble(&roster.rows, &ratings, Some(roster.label_row));

    Ok(TeamReport {
        group: Some(group),
        outcome: ReportOutcome::Complete,
        rows,
    })
}

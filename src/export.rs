use crate::matrix::{Cell, Row};
use crate::model::Group;
use crate::report::{generate_team_report, ReportOutcome, TeamReport};
use crate::store::RatingStore;
use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub group_id: String,
    pub file_name: String,
    pub outcome: ReportOutcome,
    pub row_count: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub entries: Vec<ArchiveEntry>,
}

fn needs_enclosure(field: &str) -> bool {
    field
        .chars()
        .any(|c| matches!(c, ',' | '"' | '\\' | ' ' | '\t' | '\r' | '\n'))
}

/// Quotes one field with `"` as enclosure and `\` as escape character.
///
/// Inside an enclosed field a `"` is doubled unless it directly follows an
/// unescaped `\`, in which case it is written as-is.
pub fn csv_quote(field: &str) -> String {
    if !needs_enclosure(field) {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    let mut escaped = false;
    for ch in field.chars() {
        if ch == '\\' {
            escaped = true;
        } else if !escaped && ch == '"' {
            out.push('"');
        } else {
            escaped = false;
        }
        out.push(ch);
    }
    out.push('"');
    out
}

pub fn csv_line(row: &[Cell]) -> String {
    let mut line = row
        .iter()
        .map(|c| csv_quote(&c.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

pub fn to_csv(rows: &[Row]) -> String {
    rows.iter().map(|r| csv_line(r)).collect()
}

/// Replaces every run of characters outside `[A-Za-z0-9]` with a single `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Download name for a single team report.
pub fn team_report_file_name(group_name: &str) -> String {
    format!("smartspe_team_{}_report.csv", group_name)
}

/// Archive entry name for a team.
pub fn archive_entry_name(group_name: &str) -> String {
    format!("team_{}.csv", sanitize_file_stem(group_name))
}

fn unique_entry_name(group_name: &str, used: &mut HashSet<String>) -> String {
    let base = archive_entry_name(group_name);
    if used.insert(base.clone()) {
        return base;
    }
    let stem = base.trim_end_matches(".csv").to_string();
    let mut n = 2usize;
    loop {
        let candidate = format!("{}_{}.csv", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

pub fn write_csv_file(out_path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, to_csv(rows))
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))
}

/// Why an export failed: `code` is `db_query_failed` when loading report data
/// failed and `io_failed` when writing the archive failed.
#[derive(Debug)]
pub struct ExportError {
    pub code: &'static str,
    pub error: anyhow::Error,
}

impl ExportError {
    fn storage(error: anyhow::Error) -> Self {
        Self {
            code: "db_query_failed",
            error,
        }
    }

    fn io(error: anyhow::Error) -> Self {
        Self {
            code: "io_failed",
            error,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

/// Writes one CSV per team of the evaluation into a zip archive at `out_path`.
///
/// Every report is built before the file is touched, so a storage failure
/// leaves whatever was at `out_path` alone. Entries carry a fixed timestamp so
/// unchanged data gives an identical archive. A write failure after the file
/// was created removes it.
pub fn export_evaluation_archive<S>(
    store: &S,
    evaluation_id: &str,
    out_path: &Path,
) -> Result<ArchiveSummary, ExportError>
where
    S: RatingStore + ?Sized,
{
    let groups = store
        .list_groups(evaluation_id)
        .map_err(ExportError::storage)?;
    let mut reports = Vec::with_capacity(groups.len());
    for group in &groups {
        let report =
            generate_team_report(store, evaluation_id, &group.id).map_err(ExportError::storage)?;
        reports.push((group, report));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))
            .map_err(ExportError::io)?;
    }
    let out_file = File::create(out_path)
        .with_context(|| {
            format!(
                "failed to create archive file {}",
                out_path.to_string_lossy()
            )
        })
        .map_err(ExportError::io)?;

    let result = write_archive(out_file, &reports);
    if result.is_err() {
        let _ = std::fs::remove_file(out_path);
    }
    result.map_err(ExportError::io)
}

fn write_archive(out_file: File, reports: &[(&Group, TeamReport)]) -> anyhow::Result<ArchiveSummary> {
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut used = HashSet::new();
    let mut entries = Vec::with_capacity(reports.len());
    for (group, report) in reports {
        let file_name = unique_entry_name(&group.name, &mut used);
        zip.start_file(file_name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", file_name))?;
        zip.write_all(to_csv(&report.rows).as_bytes())
            .with_context(|| format!("failed to write entry {}", file_name))?;
        entries.push(ArchiveEntry {
            group_id: group.id.clone(),
            file_name,
            outcome: report.outcome,
            row_count: report.rows.len(),
        });
    }

    zip.finish().context("failed to finalize archive")?;
    Ok(ArchiveSummary { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_are_not_enclosed() {
        assert_eq!(csv_quote("Q1"), "Q1");
        assert_eq!(csv_quote(""), "");
        assert_eq!(csv_quote("4.5"), "4.5");
    }

    #[test]
    fn spaces_and_commas_force_enclosure() {
        assert_eq!(csv_quote("TEAM #"), "\"TEAM #\"");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
    }

    #[test]
    fn quotes_are_doubled_unless_escaped() {
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_quote("a\\\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn line_joins_cells_and_ends_with_newline() {
        let row = vec![Cell::Number(5.0), Cell::Blank, Cell::Number(2.0)];
        assert_eq!(csv_line(&row), "5,,2\n");
        assert_eq!(csv_line(&[]), "\n");
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_file_stem("Team X"), "Team_X");
        assert_eq!(sanitize_file_stem("A & B -- 3"), "A_B_3");
        assert_eq!(sanitize_file_stem("SPEctra"), "SPEctra");
        assert_eq!(archive_entry_name("Grp/1"), "team_Grp_1.csv");
    }

    #[test]
    fn colliding_entry_names_get_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(unique_entry_name("A B", &mut used), "team_A_B.csv");
        assert_eq!(unique_entry_name("A-B", &mut used), "team_A_B_2.csv");
        assert_eq!(unique_entry_name("A.B", &mut used), "team_A_B_3.csv");
    }
}

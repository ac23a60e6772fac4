use crate::model::{GroupMember, Question};
use serde::Serialize;
use std::fmt;

pub const AVERAGE_HEADER: &str = "Average for each";

/// One spreadsheet cell. `Blank` is "no data" and is never the same as a zero score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Blank,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_blank(&self) -> bool {
        matches!(self, Cell::Blank)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Blank => Ok(()),
            // Shortest round-trip form: 4.0 prints as "4", 4.5 as "4.5".
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

pub type Row = Vec<Cell>;

pub fn blank_row(width: usize) -> Row {
    vec![Cell::Blank; width]
}

pub fn text_row<I, S>(cells: I) -> Row
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    cells.into_iter().map(Cell::text).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Length of the longest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Right-pads every row with blanks up to `width`. Longer rows are left alone.
    pub fn pad_to(&mut self, width: usize) {
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, Cell::Blank);
            }
        }
    }
}

/// Rounds half away from zero at `places` decimals.
///
/// The scaled value is first cut to 15 significant digits, so a half that
/// binary floating point stores just below .5 (1.005, 41/40) still rounds up.
pub fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    let pre: f64 = format!("{:.14e}", scaled).parse().unwrap_or(scaled);
    pre.round() / factor
}

/// Half away from zero at two decimals.
pub fn round2(x: f64) -> f64 {
    round_to(x, 2)
}

fn mean_of_numbers<'a, I>(cells: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Cell>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in cells.into_iter().filter_map(Cell::as_number) {
        sum += v;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(round2(sum / count as f64))
    }
}

fn number_or_blank(v: Option<f64>) -> Cell {
    v.map(Cell::Number).unwrap_or(Cell::Blank)
}

/// Average of the numeric cells in a rating row, blank when the row has none.
pub fn row_average(values: &[Cell]) -> Cell {
    number_or_blank(mean_of_numbers(values))
}

/// Average of column `col` across `rows`, skipping blanks and short rows.
pub fn column_average(rows: &[Row], col: usize) -> Cell {
    number_or_blank(mean_of_numbers(rows.iter().filter_map(|r| r.get(col))))
}

/// Builds the ratings sub-table for one target.
///
/// Layout: row 0 holds the target's name, row 1 the `Q1..Qn` headers plus
/// [`AVERAGE_HEADER`], then one row per rater in roster order, then the
/// per-question averages. Every row is `questions.len() + 1` wide.
///
/// `score` returns `Ok(None)` for an answer that was never given; an `Err` is a
/// storage failure and aborts the build.
pub fn build_target_submatrix<F>(
    target: &GroupMember,
    raters: &[GroupMember],
    questions: &[Question],
    mut score: F,
) -> anyhow::Result<Table>
where
    F: FnMut(&GroupMember, &GroupMember, &Question) -> anyhow::Result<Option<i64>>,
{
    let n = questions.len();
    let width = n + 1;
    let mut rows: Vec<Row> = Vec::with_capacity(raters.len() + 3);

    rows.push(vec![Cell::text(target.display_name())]);

    let mut header: Row = (1..=n).map(|q| Cell::text(format!("Q{}", q))).collect();
    header.push(Cell::text(AVERAGE_HEADER));
    rows.push(header);

    for rater in raters {
        let mut row: Row = Vec::with_capacity(width);
        for question in questions {
            let value = score(rater, target, question)?;
            row.push(number_or_blank(value.map(|v| v as f64)));
        }
        let avg = row_average(&row);
        row.push(avg);
        rows.push(row);
    }

    // No grand average in the trailing cell.
    let mut averages: Row = (0..n).map(|q| column_average(&rows[2..], q)).collect();
    averages.push(Cell::Blank);
    rows.push(averages);

    let mut table = Table::new(rows);
    table.pad_to(width);
    Ok(table)
}

/// One sub-table per member, in roster order; every member is both a target and a rater.
pub fn build_group_matrices<F>(
    members: &[GroupMember],
    questions: &[Question],
    mut score: F,
) -> anyhow::Result<Vec<Table>>
where
    F: FnMut(&GroupMember, &GroupMember, &Question) -> anyhow::Result<Option<i64>>,
{
    members
        .iter()
        .map(|target| build_target_submatrix(target, members, questions, &mut score))
        .collect()
}

/// Places tables next to each other with `gap` blank columns between them.
///
/// Each table is first padded to its own widest row (at least one column); a
/// table shorter than the tallest contributes blank rows of its width.
pub fn merge_side_by_side(tables: &[Table], gap: usize) -> Table {
    if tables.is_empty() {
        return Table::default();
    }

    let padded: Vec<Table> = tables
        .iter()
        .map(|t| {
            let mut t = t.clone();
            let w = t.width().max(1);
            t.pad_to(w);
            t
        })
        .collect();
    let widths: Vec<usize> = padded.iter().map(|t| t.width().max(1)).collect();
    let height = padded.iter().map(Table::height).max().unwrap_or(0);
    let total_width = widths.iter().sum::<usize>() + gap * (padded.len() - 1);

    let mut rows = Vec::with_capacity(height);
    for r in 0..height {
        let mut row: Row = Vec::with_capacity(total_width);
        for (ti, table) in padded.iter().enumerate() {
            match table.rows.get(r) {
                Some(src) => row.extend(src.iter().cloned()),
                None => row.extend(blank_row(widths[ti])),
            }
            if ti + 1 < padded.len() {
                row.extend(blank_row(gap));
            }
        }
        rows.push(row);
    }
    Table::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    #[test]
    fn round2_goes_half_away_from_zero() {
        assert_eq!(round2(4.5), 4.5);
        assert_eq!(round2(10.0 / 3.0), 3.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-2.345), -2.35);
    }

    #[test]
    fn halves_stored_below_point_five_still_round_up() {
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(41.0 / 40.0), 1.03);
        assert_eq!(round_to(0.45, 1), 0.5);
        assert_eq!(round_to(3.25, 1), 3.3);
    }

    #[test]
    fn row_average_ignores_blanks() {
        assert_eq!(row_average(&[n(5.0), Cell::Blank, n(3.0)]), n(4.0));
        assert_eq!(row_average(&[Cell::Blank, Cell::Blank]), Cell::Blank);
        assert_eq!(row_average(&[]), Cell::Blank);
    }

    #[test]
    fn column_average_counts_only_numeric_cells() {
        let rows = vec![vec![n(5.0)], vec![n(3.0)], vec![Cell::Blank], vec![n(1.0)]];
        assert_eq!(column_average(&rows, 0), n(3.0));
        assert_eq!(column_average(&rows, 1), Cell::Blank);
    }

    #[test]
    fn cells_display_like_spreadsheet_values() {
        assert_eq!(n(4.0).to_string(), "4");
        assert_eq!(n(4.5).to_string(), "4.5");
        assert_eq!(n(3.33).to_string(), "3.33");
        assert_eq!(Cell::Blank.to_string(), "");
        assert_eq!(Cell::text("Q1").to_string(), "Q1");
        assert!(Cell::Blank.is_blank());
        assert!(!n(0.0).is_blank());
    }

    #[test]
    fn merge_of_two_square_tables_has_gap_column() {
        let a = Table::new(vec![vec![n(1.0), n(2.0)], vec![n(3.0), n(4.0)]]);
        let b = Table::new(vec![vec![n(5.0), n(6.0)], vec![n(7.0), n(8.0)]]);
        let merged = merge_side_by_side(&[a, b], 1);
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.width(), 5);
        assert_eq!(merged.rows[0], vec![n(1.0), n(2.0), Cell::Blank, n(5.0), n(6.0)]);
    }

    #[test]
    fn merge_fills_missing_rows_with_table_width() {
        let tall = Table::new(vec![vec![n(1.0)], vec![n(2.0)], vec![n(3.0)]]);
        let short = Table::new(vec![vec![n(4.0), n(5.0), n(6.0)]]);
        let merged = merge_side_by_side(&[short, tall], 2);
        assert_eq!(merged.height(), 3);
        for row in &merged.rows {
            assert_eq!(row.len(), 3 + 2 + 1);
        }
        assert_eq!(
            merged.rows[2],
            vec![Cell::Blank, Cell::Blank, Cell::Blank, Cell::Blank, Cell::Blank, n(3.0)]
        );
    }

    #[test]
    fn merge_pads_ragged_rows_within_a_table() {
        let ragged = Table::new(vec![vec![Cell::text("name")], vec![n(1.0), n(2.0), n(3.0)]]);
        let other = Table::new(vec![vec![n(9.0)]]);
        let merged = merge_side_by_side(&[ragged, other], 1);
        assert_eq!(merged.rows[0].len(), 5);
        assert_eq!(merged.rows[0][4], n(9.0));
        assert_eq!(merged.rows[1][4], Cell::Blank);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert_eq!(merge_side_by_side(&[], 1), Table::default());
    }
}

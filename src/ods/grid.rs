// src/ods/grid.rs

use serde::Serialize;

/// Tokens that mark the header row of a coverage grid.
const SHIFT_TOKENS: [&str; 8] = ["mid", "on", "day", "night", "on1", "on2", "midc", "midl"];

/// A physical row of a table. `number` is 1-based and counts dropped blank
/// rows, so it always points at the row a person sees in the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub number: u32,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn new(number: u32, cells: Vec<String>) -> Self {
        Self { number, cells }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageCell {
    pub hospital: String,
    /// Empty when the leading cell held only a hospital code.
    pub study_type: String,
    pub shift_type: String,
    pub marker: String,
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridExtraction {
    NoHeaderRow,
    Cells { header_row: u32, cells: Vec<CoverageCell> },
}

fn is_shift_token(word: &str) -> bool {
    let lower = word.to_lowercase();
    SHIFT_TOKENS.contains(&lower.as_str())
}

fn words(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(|c: char| !c.is_alphanumeric())
}

fn is_header(row: &SheetRow) -> bool {
    row.cells.len() >= 2 && row.cells.iter().any(|cell| words(cell).any(is_shift_token))
}

/// Header cells outside this set ("Notes", "Total") are not shift columns.
fn names_shift(cell: &str) -> bool {
    words(cell).any(|w| {
        is_shift_token(w) || w.eq_ignore_ascii_case("body") || w.eq_ignore_ascii_case("neuro")
    })
}

/// "CPMC CT Neuro" -> ("CPMC", "CT Neuro").
fn split_leading(cell: &str) -> (String, String) {
    let trimmed = cell.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((hospital, study)) => (hospital.to_string(), study.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Finds the first header row and reads every later row against its shift
/// columns. Blank markers never produce a cell.
pub fn extract_coverage_grid(rows: &[SheetRow]) -> GridExtraction {
    let Some(header_idx) = rows.iter().position(is_header) else {
        return GridExtraction::NoHeaderRow;
    };
    let header = &rows[header_idx];

    let shift_columns: Vec<(usize, String)> = header
        .cells
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, c)| {
            let text = c.trim();
            names_shift(text).then(|| (i, text.to_string()))
        })
        .collect();

    let mut cells = Vec::new();
    for row in &rows[header_idx + 1..] {
        let Some(leading) = row.cells.first() else {
            continue;
        };
        let (hospital, study_type) = split_leading(leading);

        for (col, shift_type) in &shift_columns {
            let Some(raw) = row.cells.get(*col) else {
                continue;
            };
            let marker = raw.trim();
            if marker.is_empty() {
                continue;
            }
            cells.push(CoverageCell {
                hospital: hospital.clone(),
                study_type: study_type.clone(),
                shift_type: shift_type.clone(),
                marker: marker.to_string(),
                row: row.number,
                column: *col as u32 + 1,
            });
        }
    }

    GridExtraction::Cells {
        header_row: header.number,
        cells,
    }
}

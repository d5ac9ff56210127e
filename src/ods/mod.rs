// src/ods/mod.rs

//! ODS structural parser: zip container -> `content.xml` -> typed sheets.

pub mod grid;
pub mod reader;
pub mod sheet_name;

use std::io::{BufReader, Cursor};
use std::path::Path;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::validation::{codes, ValidationResult};

pub use grid::{extract_coverage_grid, CoverageCell, GridExtraction, SheetRow};
pub use sheet_name::{DayType, ParsedSheetName, SheetNameParser, ShiftCategory, SpecialtyScenario, TimeRange};

/// Tables whose name starts with this are bookkeeping, not schedule data.
pub const SYSTEM_TABLE_PREFIX: &str = "_";

const CONTENT_MEMBER: &str = "content.xml";

#[derive(Debug, Error)]
pub enum OdsError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not a readable ODS archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive has no content.xml member")]
    MissingContent,
    #[error("content.xml could not be decoded: {0}")]
    Markup(#[from] quick_xml::Error),
    #[error("no sheet in {file} carries coverage data")]
    NoValidSheets { file: String },
}

impl OdsError {
    /// The file itself could not be reached, as opposed to a bad file.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, OdsError::Io { .. })
    }

    fn code(&self) -> &'static str {
        match self {
            OdsError::Io { .. } => codes::FILE_READ_ERROR,
            OdsError::Archive(_) => codes::INVALID_ARCHIVE,
            OdsError::MissingContent => codes::MISSING_CONTENT_XML,
            OdsError::Markup(_) => codes::XML_DECODE_ERROR,
            OdsError::NoValidSheets { .. } => codes::NO_VALID_SHEETS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OdsSheet {
    pub name: String,
    pub meta: ParsedSheetName,
    pub header_row: u32,
    pub cells: Vec<CoverageCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OdsData {
    pub file_name: String,
    pub sheets: Vec<OdsSheet>,
}

impl OdsData {
    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|s| s.cells.len()).sum()
    }
}

pub fn parse_file(path: impl AsRef<Path>, result: &mut ValidationResult) -> Result<OdsData, OdsError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(source) => {
            return Err(record(result, OdsError::Io { path: name, source }));
        }
    };
    parse_bytes(&name, &bytes, result)
}

/// Parses an in-memory ODS file. `name` only labels messages.
pub fn parse_bytes(name: &str, bytes: &[u8], result: &mut ValidationResult) -> Result<OdsData, OdsError> {
    result.set_context("file", name);

    let tables = match read_content(bytes) {
        Ok(t) => t,
        Err(e) => return Err(record(result, e)),
    };

    let mut sheets = Vec::new();
    for table in tables {
        if table.name.starts_with(SYSTEM_TABLE_PREFIX) {
            debug!(sheet = %table.name, "skipping system table");
            continue;
        }
        if let Some(sheet) = build_sheet(table, result) {
            sheets.push(sheet);
        }
    }

    if sheets.is_empty() {
        let err = OdsError::NoValidSheets { file: name.to_string() };
        result.add_error_with_context(err.code(), err.to_string(), json!({ "file": name }));
        warn!(file = %name, "no usable sheets");
        return Err(err);
    }

    let data = OdsData {
        file_name: name.to_string(),
        sheets,
    };
    result.add_info_with_context(
        codes::ODS_PARSED,
        format!("parsed {} sheets with {} coverage cells", data.sheets.len(), data.cell_count()),
        json!({ "sheets": data.sheets.len(), "cells": data.cell_count() }),
    );
    info!(file = %name, sheets = data.sheets.len(), cells = data.cell_count(), "ods parsed");
    Ok(data)
}

fn record(result: &mut ValidationResult, err: OdsError) -> OdsError {
    result.add_error(err.code(), err.to_string());
    warn!(error = %err, "ods file rejected");
    err
}

fn read_content(bytes: &[u8]) -> Result<Vec<reader::RawTable>, OdsError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let member = match archive.by_name(CONTENT_MEMBER) {
        Ok(m) => m,
        Err(zip::result::ZipError::FileNotFound) => return Err(OdsError::MissingContent),
        Err(e) => return Err(e.into()),
    };
    Ok(reader::read_tables(BufReader::new(member))?)
}

/// One WARNING and `None` for every way a sheet can be unusable.
fn build_sheet(table: reader::RawTable, result: &mut ValidationResult) -> Option<OdsSheet> {
    let Some(meta) = SheetNameParser::parse(&table.name) else {
        result.add_warning_with_context(
            codes::INVALID_SHEET_NAME,
            format!("sheet '{}' does not follow '<Mid|ON> <Weekday|Weekend> <Body|Neuro> [time]'", table.name),
            json!({ "sheet": table.name }),
        );
        return None;
    };

    let (header_row, cells) = match extract_coverage_grid(&table.rows) {
        GridExtraction::NoHeaderRow => {
            result.add_warning_with_context(
                codes::NO_HEADER_ROW,
                format!("sheet '{}' has no row naming shift types", table.name),
                json!({ "sheet": table.name }),
            );
            return None;
        }
        GridExtraction::Cells { header_row, cells } => (header_row, cells),
    };

    if cells.is_empty() {
        result.add_warning_with_context(
            codes::EMPTY_COVERAGE_GRID,
            format!("sheet '{}' has a header but no coverage markers", table.name),
            json!({ "sheet": table.name, "header_row": header_row }),
        );
        return None;
    }

    if meta.time_range.is_some_and(|r| r.ambiguous) {
        result.add_warning_with_context(
            codes::AMBIGUOUS_TIME_RANGE,
            format!("sheet '{}' gives hours without am/pm; read as 24-hour clock", table.name),
            json!({ "sheet": table.name }),
        );
    }
    if meta.unparsed_time {
        result.add_warning_with_context(
            codes::UNPARSED_TIME_RANGE,
            format!("sheet '{}' has an unreadable time range; imported without hours", table.name),
            json!({ "sheet": table.name }),
        );
    }

    Some(OdsSheet {
        name: table.name,
        meta,
        header_row,
        cells,
    })
}

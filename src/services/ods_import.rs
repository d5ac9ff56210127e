// src/services/ods_import.rs

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ensure_import_target, ImportError};
use crate::models::{
    HospitalId, ImportBatch, ImportSource, ScheduleVersion, ScheduleVersionId, ShiftInstance,
    SpecialtyConstraint,
};
use crate::ods::{self, CoverageCell, OdsData, OdsError, OdsSheet, SpecialtyScenario};
use crate::repository::Repositories;
use crate::validation::{codes, ValidationResult};

/// Where the spreadsheet comes from.
#[derive(Debug, Clone)]
pub enum OdsSource {
    File(PathBuf),
    Bytes { name: String, bytes: Vec<u8> },
}

impl OdsSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        OdsSource::File(path.into())
    }

    pub fn name(&self) -> String {
        match self {
            OdsSource::File(p) => p.display().to_string(),
            OdsSource::Bytes { name, .. } => name.clone(),
        }
    }

    async fn read(self) -> Result<Vec<u8>, OdsError> {
        match self {
            OdsSource::File(path) => tokio::fs::read(&path).await.map_err(|source| OdsError::Io {
                path: path.display().to_string(),
                source,
            }),
            OdsSource::Bytes { bytes, .. } => Ok(bytes),
        }
    }
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `x`/`X` is one person; a positive integer is that many.
fn parse_marker(marker: &str) -> Option<i32> {
    let m = marker.trim();
    if m.eq_ignore_ascii_case("x") {
        return Some(1);
    }
    m.parse::<i32>().ok().filter(|n| *n > 0)
}

fn specialty_for(shift_type: &str, scenario: SpecialtyScenario) -> SpecialtyConstraint {
    let words: Vec<String> = shift_type
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .collect();
    let body = words.iter().any(|w| w == "body");
    let neuro = words.iter().any(|w| w == "neuro");
    match (body, neuro) {
        (true, true) => SpecialtyConstraint::Both,
        (true, false) => SpecialtyConstraint::BodyOnly,
        (false, true) => SpecialtyConstraint::NeuroOnly,
        (false, false) => match scenario {
            SpecialtyScenario::Body => SpecialtyConstraint::BodyOnly,
            SpecialtyScenario::Neuro => SpecialtyConstraint::NeuroOnly,
        },
    }
}

pub struct OdsImportService {
    repos: Repositories,
}

impl OdsImportService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Imports one spreadsheet into a STAGING version. A batch that ends
    /// FAILED is still `Ok`; `Err` means the import could not run at all.
    pub async fn import(
        &self,
        hospital_id: HospitalId,
        version_id: ScheduleVersionId,
        source: OdsSource,
        cancel: &CancellationToken,
    ) -> Result<(ImportBatch, ValidationResult), ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        // 1) Target must be a live STAGING version of this hospital
        let version = self.repos.versions.get_by_id(version_id).await?;
        ensure_import_target(&version, hospital_id)?;

        // 2) Open the batch
        let mut batch = ImportBatch::pending(ImportSource::OdsFile, &version);
        self.repos.batches.create(&batch).await?;
        let mut result = ValidationResult::new();
        result.set_context("ods_batch_id", batch.id.to_string());
        info!(batch_id = %batch.id, version_id = %version.id, source = %source.name(), "ods import started");

        // 3) Read bytes; an unreachable file is infrastructure, not data
        let name = source.name();
        let bytes = match source.read().await {
            Ok(b) => b,
            Err(e) => {
                result.add_error(codes::FILE_READ_ERROR, e.to_string());
                self.fail(&mut batch, &e.to_string()).await?;
                return Err(e.into());
            }
        };
        batch.ingest_checksum = Some(checksum(&bytes));

        // 4) Parse off the async runtime
        let parse_name = name.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut parse_result = ValidationResult::new();
            let parsed = ods::parse_bytes(&parse_name, &bytes, &mut parse_result);
            (parsed, parse_result)
        })
        .await;
        let (parsed, parse_result) = match joined {
            Ok(out) => out,
            Err(e) => {
                self.fail(&mut batch, "parser task failed").await?;
                return Err(ImportError::Task(e.to_string()));
            }
        };
        result.merge(parse_result);

        let data = match parsed {
            Ok(d) => d,
            Err(e) => {
                warn!(batch_id = %batch.id, error = %e, "ods parse rejected the file");
                self.fail(&mut batch, &e.to_string()).await?;
                return Ok((batch, result));
            }
        };

        // 5) Cells -> shift candidates
        let candidates = build_candidates(&data, &version, &mut result);
        if candidates.is_empty() && result.has_errors() {
            result.add_error(codes::NO_RECORDS_IMPORTED, "spreadsheet produced no usable shift requirements");
            self.fail(&mut batch, "no usable records").await?;
            return Ok((batch, result));
        }

        if cancel.is_cancelled() {
            self.fail(&mut batch, "cancelled").await?;
            return Err(ImportError::Cancelled);
        }

        // 6) Persist; a rejected write costs one WARNING, not the batch
        let mut persisted = 0usize;
        for shift in &candidates {
            match self.repos.shifts.create(shift).await {
                Ok(()) => persisted += 1,
                Err(e) => {
                    result.add_warning_with_context(
                        codes::SHIFT_PERSIST_FAILED,
                        format!("could not store {} on {}: {}", shift.position_key(), shift.schedule_date, e),
                        json!({ "position": shift.position_key(), "date": shift.schedule_date.to_string() }),
                    );
                }
            }
        }

        batch.mark_complete(persisted)?;
        self.repos.batches.update(&batch).await?;
        info!(
            batch_id = %batch.id,
            persisted,
            candidates = candidates.len(),
            warnings = result.warning_count(),
            "ods import complete"
        );
        Ok((batch, result))
    }

    async fn fail(&self, batch: &mut ImportBatch, reason: &str) -> Result<(), ImportError> {
        batch.mark_failed(reason)?;
        self.repos.batches.update(batch).await?;
        warn!(batch_id = %batch.id, reason, "ods import failed");
        Ok(())
    }
}

fn window_dates(version: &ScheduleVersion) -> Vec<NaiveDate> {
    version
        .effective_start
        .iter_days()
        .take_while(|d| *d <= version.effective_end)
        .collect()
}

/// One ShiftInstance per coverage cell and matching calendar date.
fn build_candidates(data: &OdsData, version: &ScheduleVersion, result: &mut ValidationResult) -> Vec<ShiftInstance> {
    let dates = window_dates(version);
    let now = Utc::now();
    let mut out = Vec::new();

    for sheet in &data.sheets {
        let sheet_dates: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| sheet.meta.day_type.matches(*d))
            .collect();
        if sheet_dates.is_empty() {
            result.add_warning_with_context(
                codes::NO_MATCHING_DATES,
                format!(
                    "sheet '{}' is for {} days but the window {}..{} has none",
                    sheet.name, sheet.meta.day_type, version.effective_start, version.effective_end
                ),
                json!({ "sheet": sheet.name }),
            );
            continue;
        }

        let mut rows_missing_study = HashSet::new();
        for cell in &sheet.cells {
            if cell.study_type.is_empty() {
                if rows_missing_study.insert(cell.row) {
                    result.add_warning_with_context(
                        codes::MISSING_STUDY_TYPE,
                        format!("sheet '{}' row {}: '{}' has no study type", sheet.name, cell.row, cell.hospital),
                        json!({ "sheet": sheet.name, "row": cell.row }),
                    );
                }
                continue;
            }
            let Some(headcount) = parse_marker(&cell.marker) else {
                result.add_warning_with_context(
                    codes::INVALID_COVERAGE_MARKER,
                    format!(
                        "sheet '{}' row {} column {}: '{}' is not 'x' or a headcount",
                        sheet.name, cell.row, cell.column, cell.marker
                    ),
                    json!({ "sheet": sheet.name, "row": cell.row, "column": cell.column, "marker": cell.marker }),
                );
                continue;
            };
            for date in &sheet_dates {
                out.push(shift_for(sheet, cell, headcount, *date, version, now));
            }
        }
    }
    out
}

fn shift_for(
    sheet: &OdsSheet,
    cell: &CoverageCell,
    headcount: i32,
    date: NaiveDate,
    version: &ScheduleVersion,
    now: chrono::DateTime<Utc>,
) -> ShiftInstance {
    let range = sheet.meta.time_range;
    ShiftInstance {
        id: Uuid::new_v4(),
        schedule_version_id: version.id,
        hospital_id: version.hospital_id,
        site_code: cell.hospital.clone(),
        shift_type: cell.shift_type.clone(),
        schedule_date: date,
        start_time: range.map(|r| r.start),
        end_time: range.map(|r| r.end),
        study_type: cell.study_type.clone(),
        specialty_constraint: specialty_for(&cell.shift_type, sheet.meta.scenario),
        desired_coverage: headcount,
        is_mandatory: true,
        created_at: now,
        created_by: version.created_by,
        deleted_at: None,
        deleted_by: None,
    }
}

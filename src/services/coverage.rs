// src/services/coverage.rs

//! Coverage against declared requirements, computed from exactly two bulk
//! reads regardless of how many shifts the version holds.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Utc};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Assignment, CoverageCalculation, PositionCoverage, ScheduleVersionId, ShiftInstance,
    ShiftInstanceId,
};
use crate::repository::{Repositories, RepositoryError};
use crate::validation::{codes, ValidationResult};

pub use crate::models::CoverageSummary;

/// Reads issued per calculation: shifts in range, then their assignments.
pub const BULK_READS_PER_CALCULATION: i32 = 2;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("coverage calculation cancelled")]
    Cancelled,
    #[error("invalid period: {end} is before {start}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct CoverageCalculator {
    repos: Repositories,
}

impl CoverageCalculator {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn calculate_coverage_for_schedule(
        &self,
        version_id: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<CoverageCalculation, CoverageError> {
        if cancel.is_cancelled() {
            return Err(CoverageError::Cancelled);
        }
        if end < start {
            return Err(CoverageError::InvalidPeriod { start, end });
        }

        // 1) Every shift of the version in range
        let shifts = self.repos.shifts.list_by_version_in_range(version_id, start, end).await?;
        // 2) Every assignment on those shifts, issued even for an empty id set
        let ids: Vec<ShiftInstanceId> = shifts.iter().map(|s| s.id).collect();
        let assignments = self.repos.assignments.list_by_shift_ids(&ids).await?;

        let coverage_by_position = aggregate(&shifts, &assignments);
        let summary = summarize(&coverage_by_position, shifts.len());
        debug!(%version_id, shifts = shifts.len(), assignments = assignments.len(), "coverage aggregated");

        Ok(CoverageCalculation {
            id: Uuid::new_v4(),
            schedule_version_id: version_id,
            hospital_id: shifts.first().map(|s| s.hospital_id),
            period_start: start,
            period_end: end,
            coverage_by_position,
            summary,
            query_count: BULK_READS_PER_CALCULATION,
            calculated_at: Utc::now(),
            deleted_at: None,
        })
    }

    /// Same calculation, reported through a ValidationResult instead of `Err`.
    pub async fn calculate_coverage(
        &self,
        version_id: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> (Option<CoverageCalculation>, ValidationResult) {
        let mut result = ValidationResult::new();
        result.set_context("schedule_version_id", version_id.to_string());
        match self.calculate_coverage_for_schedule(version_id, start, end, cancel).await {
            Ok(calc) => {
                result.add_info_with_context(
                    codes::COVERAGE_COMPLETE,
                    format!(
                        "coverage calculated for {} positions over {} shifts",
                        calc.coverage_by_position.len(),
                        calc.summary.total_shifts
                    ),
                    json!({ "calculation_id": calc.id.to_string() }),
                );
                (Some(calc), result)
            }
            Err(e) => {
                result.add_error(codes::COVERAGE_CALCULATION_FAILED, e.to_string());
                (None, result)
            }
        }
    }

    /// Compares total assigned headcount between two versions over one period.
    pub async fn compare_version_coverage(
        &self,
        old_version: ScheduleVersionId,
        new_version: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult, CoverageError> {
        let mut result = ValidationResult::new();

        let old = match self.calculate_coverage_for_schedule(old_version, start, end, cancel).await {
            Ok(c) => Some(c),
            Err(e) => {
                result.add_warning(codes::COVERAGE_CALCULATION_FAILED, format!("old version {old_version}: {e}"));
                None
            }
        };
        let new = match self.calculate_coverage_for_schedule(new_version, start, end, cancel).await {
            Ok(c) => c,
            Err(e) => {
                result.add_error(codes::COVERAGE_CALCULATION_FAILED, format!("new version {new_version}: {e}"));
                return Err(e);
            }
        };

        if let Some(old) = old {
            let (before, after) = (old.summary.total_assigned, new.summary.total_assigned);
            let ctx = json!({ "old_version": old_version.to_string(), "new_version": new_version.to_string() });
            match after.cmp(&before) {
                std::cmp::Ordering::Greater => {
                    result.add_info_with_context(codes::COVERAGE_IMPROVED, format!("coverage improved: {before} -> {after}"), ctx);
                }
                std::cmp::Ordering::Less => {
                    result.add_warning_with_context(codes::COVERAGE_DEGRADED, format!("coverage degraded: {before} -> {after}"), ctx);
                }
                std::cmp::Ordering::Equal => {
                    result.add_info_with_context(codes::COVERAGE_UNCHANGED, "coverage unchanged", ctx);
                }
            }
        }
        Ok(result)
    }
}

/// WARNING per required position nobody is assigned to.
pub fn validate_coverage(calc: &CoverageCalculation) -> ValidationResult {
    let mut result = ValidationResult::new();
    for (position, cov) in &calc.coverage_by_position {
        if cov.desired > 0 && cov.assigned == 0 {
            result.add_warning_with_context(
                codes::COVERAGE_GAP,
                format!("position {position} has no coverage ({} required)", cov.desired),
                json!({ "position": position, "desired": cov.desired, "shifts": cov.shift_count }),
            );
        }
    }
    if !calc.summary.positions_without_requirement.is_empty() {
        result.add_info_with_context(
            codes::COVERAGE_NO_REQUIREMENT,
            format!(
                "{} positions declare no requirement",
                calc.summary.positions_without_requirement.len()
            ),
            json!({ "positions": calc.summary.positions_without_requirement }),
        );
    }
    info!(
        calculation_id = %calc.id,
        gaps = result.warning_count(),
        "coverage validated"
    );
    result
}

fn aggregate(shifts: &[ShiftInstance], assignments: &[Assignment]) -> BTreeMap<String, PositionCoverage> {
    let mut live: HashMap<ShiftInstanceId, i64> = HashMap::new();
    for a in assignments.iter().filter(|a| !a.is_deleted()) {
        *live.entry(a.shift_instance_id).or_default() += 1;
    }

    let mut positions: BTreeMap<String, PositionCoverage> = BTreeMap::new();
    for s in shifts {
        let entry = positions.entry(s.position_key()).or_insert(PositionCoverage {
            shift_count: 0,
            desired: 0,
            assigned: 0,
            percentage: None,
        });
        entry.shift_count += 1;
        entry.desired += i64::from(s.desired_coverage.max(0));
        entry.assigned += live.get(&s.id).copied().unwrap_or(0);
    }
    for cov in positions.values_mut() {
        cov.percentage = ratio(cov.assigned, cov.desired);
    }
    positions
}

/// Fraction of required headcount filled (1.0 = fully staffed).
fn ratio(assigned: i64, desired: i64) -> Option<f64> {
    (desired > 0).then(|| assigned as f64 / desired as f64)
}

fn summarize(positions: &BTreeMap<String, PositionCoverage>, total_shifts: usize) -> CoverageSummary {
    let mut summary = CoverageSummary {
        total_shifts: total_shifts as u32,
        positions_covered: positions.len() as u32,
        ..Default::default()
    };
    for (key, cov) in positions {
        if cov.desired == 0 {
            summary.positions_without_requirement.push(key.clone());
            continue;
        }
        summary.total_desired += cov.desired;
        summary.total_assigned += cov.assigned;
    }
    summary.coverage_percentage = ratio(summary.total_assigned, summary.total_desired);
    summary
}

// src/models/mod.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type HospitalId = Uuid;
pub type PersonId = Uuid;
pub type UserId = Uuid;
pub type ScheduleVersionId = Uuid;
pub type ShiftInstanceId = Uuid;
pub type AssignmentId = Uuid;
pub type ImportBatchId = Uuid;
pub type CoverageCalculationId = Uuid;

/// Error for status strings read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// Text-backed enums: one `as_str` / `FromStr` pair each, stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedule versions
// ─────────────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionStatus {
    Staging,
    Production,
    Archived,
}

text_enum!(VersionStatus, "version status" {
    Staging => "STAGING",
    Production => "PRODUCTION",
    Archived => "ARCHIVED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleVersion {
    pub id: ScheduleVersionId,
    pub hospital_id: HospitalId,
    pub status: VersionStatus,
    pub effective_start: NaiveDate,
    pub effective_end: NaiveDate,
    pub validation_summary: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promoted_by: Option<UserId>,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl ScheduleVersion {
    pub fn new_staging(
        hospital_id: HospitalId,
        effective_start: NaiveDate,
        effective_end: NaiveDate,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hospital_id,
            status: VersionStatus::Staging,
            effective_start,
            effective_end,
            validation_summary: None,
            created_at: now,
            created_by,
            updated_at: now,
            promoted_at: None,
            promoted_by: None,
            archived_at: None,
            archived_by: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_start <= date && date <= self.effective_end
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shift instances & assignments
// ─────────────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecialtyConstraint {
    BodyOnly,
    NeuroOnly,
    Both,
}

text_enum!(SpecialtyConstraint, "specialty constraint" {
    BodyOnly => "BODY_ONLY",
    NeuroOnly => "NEURO_ONLY",
    Both => "BOTH",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftInstance {
    pub id: ShiftInstanceId,
    pub schedule_version_id: ScheduleVersionId,
    pub hospital_id: HospitalId,
    pub site_code: String,
    pub shift_type: String,
    pub schedule_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub study_type: String,
    pub specialty_constraint: SpecialtyConstraint,
    pub desired_coverage: i32,
    pub is_mandatory: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl ShiftInstance {
    /// Aggregation key: shift type, study type and specialty constraint.
    pub fn position_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.shift_type, self.study_type, self.specialty_constraint
        )
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentSource {
    Manual,
    ExternalScrape,
    Override,
}

text_enum!(AssignmentSource, "assignment source" {
    Manual => "MANUAL",
    ExternalScrape => "EXTERNAL_SCRAPE",
    Override => "OVERRIDE",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub person_id: PersonId,
    pub shift_instance_id: ShiftInstanceId,
    pub schedule_date: NaiveDate,
    /// Shift label exactly as the source reported it.
    pub original_shift_label: String,
    pub source: AssignmentSource,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl Assignment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Import batches
// ─────────────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchState {
    Pending,
    Complete,
    Failed,
}

text_enum!(BatchState, "batch state" {
    Pending => "PENDING",
    Complete => "COMPLETE",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportSource {
    OdsFile,
    ExternalScrape,
}

text_enum!(ImportSource, "import source" {
    OdsFile => "ODS_FILE",
    ExternalScrape => "EXTERNAL_SCRAPE",
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("import batch {id} is already {state}")]
pub struct BatchAlreadyTerminal {
    pub id: ImportBatchId,
    pub state: BatchState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: ImportBatchId,
    pub hospital_id: HospitalId,
    pub schedule_version_id: ScheduleVersionId,
    pub source: ImportSource,
    pub state: BatchState,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub row_count: i32,
    pub ingest_checksum: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl ImportBatch {
    pub fn pending(source: ImportSource, version: &ScheduleVersion) -> Self {
        Self {
            id: Uuid::new_v4(),
            hospital_id: version.hospital_id,
            schedule_version_id: version.id,
            source,
            state: BatchState::Pending,
            window_start: version.effective_start,
            window_end: version.effective_end,
            row_count: 0,
            ingest_checksum: None,
            error_message: None,
            created_at: Utc::now(),
            created_by: version.created_by,
            completed_at: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state != BatchState::Pending
    }

    fn ensure_pending(&self) -> Result<(), BatchAlreadyTerminal> {
        if self.is_terminal() {
            return Err(BatchAlreadyTerminal { id: self.id, state: self.state });
        }
        Ok(())
    }

    pub fn mark_complete(&mut self, row_count: usize) -> Result<(), BatchAlreadyTerminal> {
        self.ensure_pending()?;
        self.state = BatchState::Complete;
        self.row_count = i32::try_from(row_count).unwrap_or(i32::MAX);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), BatchAlreadyTerminal> {
        self.ensure_pending()?;
        self.state = BatchState::Failed;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coverage snapshots
// ─────────────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCoverage {
    pub shift_count: u32,
    pub desired: i64,
    pub assigned: i64,
    /// `None` when the position declares no requirement (desired = 0).
    pub percentage: Option<f64>,
}

/// Rollup stored beside each calculation. Read back through `from_value` so
/// a hand-edited or truncated summary is rejected instead of defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub total_shifts: u32,
    pub total_desired: i64,
    pub total_assigned: i64,
    pub coverage_percentage: Option<f64>,
    pub positions_covered: u32,
    #[serde(default)]
    pub positions_without_requirement: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("coverage summary is not an object")]
    NotAnObject,
    #[error("coverage summary is missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("coverage summary is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CoverageSummary {
    const REQUIRED_KEYS: [&'static str; 5] = [
        "total_shifts",
        "total_desired",
        "total_assigned",
        "coverage_percentage",
        "positions_covered",
    ];

    pub fn from_value(value: &serde_json::Value) -> Result<Self, SummaryError> {
        let obj = value.as_object().ok_or(SummaryError::NotAnObject)?;
        for key in Self::REQUIRED_KEYS {
            if !obj.contains_key(key) {
                return Err(SummaryError::MissingKey(key));
            }
        }
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageCalculation {
    pub id: CoverageCalculationId,
    pub schedule_version_id: ScheduleVersionId,
    pub hospital_id: Option<HospitalId>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub coverage_by_position: BTreeMap<String, PositionCoverage>,
    pub summary: CoverageSummary,
    pub query_count: i32,
    pub calculated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> ScheduleVersion {
        ScheduleVersion::new_staging(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2025, 3, 1).expect("date"),
            NaiveDate::from_ymd_opt(2025, 3, 31).expect("date"),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn status_text_round_trips() {
        for s in [VersionStatus::Staging, VersionStatus::Production, VersionStatus::Archived] {
            assert_eq!(s.as_str().parse::<VersionStatus>(), Ok(s));
        }
        let err = "LIVE".parse::<VersionStatus>().expect_err("unknown status");
        assert_eq!(err.value, "LIVE");
    }

    #[test]
    fn batch_takes_its_window_from_the_version() {
        let v = version();
        let b = ImportBatch::pending(ImportSource::OdsFile, &v);
        assert_eq!(b.state, BatchState::Pending);
        assert_eq!(b.window_start, v.effective_start);
        assert_eq!(b.window_end, v.effective_end);
        assert_eq!(b.schedule_version_id, v.id);
    }

    #[test]
    fn terminal_batches_refuse_further_transitions() {
        let mut b = ImportBatch::pending(ImportSource::ExternalScrape, &version());
        b.mark_complete(12).expect("pending -> complete");
        assert_eq!(b.row_count, 12);
        assert!(b.completed_at.is_some());

        assert!(b.mark_failed("late failure").is_err());
        assert!(b.mark_complete(99).is_err());
        assert_eq!(b.state, BatchState::Complete);
        assert_eq!(b.row_count, 12);
        assert!(b.error_message.is_none());
    }

    #[test]
    fn failed_batch_keeps_reason() {
        let mut b = ImportBatch::pending(ImportSource::OdsFile, &version());
        b.mark_failed("no sheets").expect("pending -> failed");
        assert_eq!(b.state, BatchState::Failed);
        assert_eq!(b.error_message.as_deref(), Some("no sheets"));
    }

    #[test]
    fn summary_requires_its_keys() {
        let ok = serde_json::json!({
            "total_shifts": 3,
            "total_desired": 4,
            "total_assigned": 2,
            "coverage_percentage": 50.0,
            "positions_covered": 1,
            "positions_without_requirement": []
        });
        let s = CoverageSummary::from_value(&ok).expect("valid summary");
        assert_eq!(s.total_desired, 4);

        let missing = serde_json::json!({ "total_shifts": 3 });
        assert!(matches!(
            CoverageSummary::from_value(&missing),
            Err(SummaryError::MissingKey("total_desired"))
        ));
        assert!(matches!(
            CoverageSummary::from_value(&serde_json::json!([1, 2])),
            Err(SummaryError::NotAnObject)
        ));
    }

    #[test]
    fn position_key_joins_the_three_parts() {
        let v = version();
        let shift = ShiftInstance {
            id: Uuid::new_v4(),
            schedule_version_id: v.id,
            hospital_id: v.hospital_id,
            site_code: "CPMC".into(),
            shift_type: "Mid Neuro".into(),
            schedule_date: v.effective_start,
            start_time: None,
            end_time: None,
            study_type: "CT Neuro".into(),
            specialty_constraint: SpecialtyConstraint::NeuroOnly,
            desired_coverage: 1,
            is_mandatory: true,
            created_at: Utc::now(),
            created_by: v.created_by,
            deleted_at: None,
            deleted_by: None,
        };
        assert_eq!(shift.position_key(), "Mid Neuro_CT Neuro_NEURO_ONLY");
    }
}

// src/services/orchestrator.rs

//! One import run: create version -> spreadsheet -> scrape -> coverage.
//! Lower layers only classify failures; this is the one place that decides
//! whether a failure ends the run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::coverage::{validate_coverage, CoverageCalculator};
use super::ods_import::{OdsImportService, OdsSource};
use super::scrape_import::ScrapeImportService;
use super::versions::ScheduleVersionService;
use super::ImportError;
use crate::models::{BatchState, CoverageCalculation, HospitalId, ImportBatch, ScheduleVersionId, UserId};
use crate::repository::Repositories;
use crate::validation::{codes, ValidationResult};

/// What a failed external scrape does to the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeFailurePolicy {
    /// Record a WARNING and compute coverage from the spreadsheet alone.
    #[default]
    ContinueWithWarning,
    AbortWorkflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WorkflowError {
    #[error("schedule version could not be created: {0}")]
    VersionCreate(String),
    #[error("spreadsheet import could not run: {0}")]
    OdsImport(String),
    #[error("spreadsheet import failed: {0}")]
    OdsBatchFailed(String),
    #[error("external scrape failed: {0}")]
    ScrapeImport(String),
    #[error("coverage calculation failed: {0}")]
    Coverage(String),
    #[error("workflow cancelled before {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub hospital_id: HospitalId,
    pub effective_start: NaiveDate,
    pub effective_end: NaiveDate,
    pub created_by: UserId,
    pub ods: OdsSource,
}

/// Everything a run produced, including partial output from aborted runs.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub schedule_version_id: Option<ScheduleVersionId>,
    pub ods_batch: Option<ImportBatch>,
    pub scrape_batch: Option<ImportBatch>,
    pub coverage: Option<CoverageCalculation>,
    pub validation: ValidationResult,
    pub success: bool,
    pub error: Option<WorkflowError>,
}

impl WorkflowResult {
    fn new() -> Self {
        Self {
            schedule_version_id: None,
            ods_batch: None,
            scrape_batch: None,
            coverage: None,
            validation: ValidationResult::new(),
            success: false,
            error: None,
        }
    }

    /// Report printed by the worker: ids, batch outcomes, coverage rollup,
    /// every message, and the human-readable summary.
    pub fn report(&self) -> Value {
        let batch = |b: &Option<ImportBatch>| {
            b.as_ref().map(|b| {
                json!({
                    "id": b.id.to_string(),
                    "state": b.state,
                    "row_count": b.row_count,
                    "ingest_checksum": b.ingest_checksum,
                    "error_message": b.error_message,
                })
            })
        };
        json!({
            "schedule_version_id": self.schedule_version_id.map(|id| id.to_string()),
            "success": self.success,
            "error": self.error.as_ref().map(|e| e.to_string()),
            "importable": self.validation.is_importable(),
            "promotable": self.validation.is_promotable(),
            "ods_batch": batch(&self.ods_batch),
            "scrape_batch": batch(&self.scrape_batch),
            "coverage": self.coverage.as_ref().map(|c| json!({
                "calculation_id": c.id.to_string(),
                "summary": c.summary,
                "positions": c.coverage_by_position,
            })),
            "messages": self.validation.messages(),
            "summary": self.validation.summary(),
        })
    }
}

pub struct ScheduleImportOrchestrator {
    repos: Repositories,
    versions: ScheduleVersionService,
    ods: OdsImportService,
    scrape: Option<ScrapeImportService>,
    coverage: CoverageCalculator,
    scrape_policy: ScrapeFailurePolicy,
}

impl ScheduleImportOrchestrator {
    pub fn new(repos: Repositories, scrape: Option<ScrapeImportService>, scrape_policy: ScrapeFailurePolicy) -> Self {
        Self {
            versions: ScheduleVersionService::new(repos.clone()),
            ods: OdsImportService::new(repos.clone()),
            coverage: CoverageCalculator::new(repos.clone()),
            repos,
            scrape,
            scrape_policy,
        }
    }

    pub fn versions(&self) -> &ScheduleVersionService {
        &self.versions
    }

    fn cancelled(out: &mut WorkflowResult, cancel: &CancellationToken, before: &str) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        out.validation
            .add_error(codes::WORKFLOW_CANCELLED, format!("run cancelled before {before}"));
        out.error = Some(WorkflowError::Cancelled(before.to_string()));
        warn!(phase = before, "workflow cancelled");
        true
    }

    pub async fn execute_import(&self, req: WorkflowRequest, cancel: &CancellationToken) -> WorkflowResult {
        let mut out = WorkflowResult::new();
        out.validation.set_context("hospital_id", req.hospital_id.to_string());

        if Self::cancelled(&mut out, cancel, "version creation") {
            return out;
        }

        // Phase 0: STAGING version
        let version = match self
            .versions
            .create_version(req.hospital_id, req.effective_start, req.effective_end, req.created_by)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "version creation failed");
                out.validation.add_error(codes::VERSION_CREATE_FAILED, e.to_string());
                out.error = Some(WorkflowError::VersionCreate(e.to_string()));
                return out;
            }
        };
        out.schedule_version_id = Some(version.id);
        out.validation.set_context("schedule_version_id", version.id.to_string());
        info!(version_id = %version.id, "workflow started");

        self.run_phases(&mut out, &req, version.id, cancel).await;
        self.attach_summary(&mut out, version.id).await;
        info!(
            version_id = %version.id,
            success = out.success,
            errors = out.validation.error_count(),
            warnings = out.validation.warning_count(),
            "workflow finished"
        );
        out
    }

    async fn run_phases(
        &self,
        out: &mut WorkflowResult,
        req: &WorkflowRequest,
        version_id: ScheduleVersionId,
        cancel: &CancellationToken,
    ) {
        // Phase 1: spreadsheet
        if Self::cancelled(out, cancel, "spreadsheet import") {
            return;
        }
        match self.ods.import(req.hospital_id, version_id, req.ods.clone(), cancel).await {
            Ok((batch, result)) => {
                out.validation.merge(result);
                let failed = batch.state == BatchState::Failed;
                let reason = batch.error_message.clone().unwrap_or_default();
                out.ods_batch = Some(batch);
                if failed {
                    out.validation
                        .add_error(codes::ODS_IMPORT_FAILED, format!("spreadsheet import failed: {reason}"));
                    out.error = Some(WorkflowError::OdsBatchFailed(reason));
                    return;
                }
            }
            Err(ImportError::Cancelled) => {
                Self::cancelled(out, cancel, "spreadsheet persistence");
                return;
            }
            Err(e) => {
                error!(error = %e, "spreadsheet import could not run");
                out.validation.add_error(codes::ODS_IMPORT_FATAL, e.to_string());
                out.error = Some(WorkflowError::OdsImport(e.to_string()));
                return;
            }
        }

        // Phase 2: external scrape
        if Self::cancelled(out, cancel, "external scrape") {
            return;
        }
        if !self.scrape_phase(out, req, version_id, cancel).await {
            return;
        }

        // Phase 3: coverage
        if Self::cancelled(out, cancel, "coverage calculation") {
            return;
        }
        let version = match self.versions.get_version(version_id).await {
            Ok(v) => v,
            Err(e) => {
                out.validation.add_error(codes::COVERAGE_CALCULATION_FAILED, e.to_string());
                out.error = Some(WorkflowError::Coverage(e.to_string()));
                return;
            }
        };
        let calc = match self
            .coverage
            .calculate_coverage_for_schedule(version.id, version.effective_start, version.effective_end, cancel)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "coverage calculation failed");
                out.validation.add_error(codes::COVERAGE_CALCULATION_FAILED, e.to_string());
                out.error = Some(WorkflowError::Coverage(e.to_string()));
                return;
            }
        };

        out.validation.merge(validate_coverage(&calc));
        match self.repos.coverage.create(&calc).await {
            Ok(()) => {
                out.validation.add_info_with_context(
                    codes::COVERAGE_COMPLETE,
                    format!(
                        "coverage calculated for {} positions over {} shifts",
                        calc.coverage_by_position.len(),
                        calc.summary.total_shifts
                    ),
                    json!({ "calculation_id": calc.id.to_string() }),
                );
                out.success = true;
            }
            Err(e) => {
                out.validation.add_error(codes::COVERAGE_PERSIST_FAILED, e.to_string());
                out.error = Some(WorkflowError::Coverage(e.to_string()));
            }
        }
        out.coverage = Some(calc);

        if out.success {
            out.validation.add_info(codes::WORKFLOW_COMPLETE, "import workflow completed");
        }
    }

    /// Returns `false` when the run must stop here.
    async fn scrape_phase(
        &self,
        out: &mut WorkflowResult,
        req: &WorkflowRequest,
        version_id: ScheduleVersionId,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(scrape) = &self.scrape else {
            out.validation
                .add_info(codes::SCRAPE_SKIPPED, "no external scrape source configured");
            return true;
        };

        let failure = match scrape.import(req.hospital_id, version_id, cancel).await {
            Ok((batch, result)) => {
                let window_errors = result.error_count();
                out.validation.merge(result);
                let failed = batch.state == BatchState::Failed;
                let reason = batch.error_message.clone().unwrap_or_default();
                out.scrape_batch = Some(batch);
                if !failed {
                    if window_errors > 0 {
                        out.validation.add_warning(
                            codes::SCRAPE_IMPORT_INCOMPLETE,
                            format!("{window_errors} scrape windows failed; assignments are partial"),
                        );
                    }
                    return true;
                }
                reason
            }
            Err(ImportError::Cancelled) => {
                Self::cancelled(out, cancel, "scrape persistence");
                return false;
            }
            Err(e) => e.to_string(),
        };

        match self.scrape_policy {
            ScrapeFailurePolicy::ContinueWithWarning => {
                warn!(reason = %failure, "scrape failed; continuing with spreadsheet data");
                out.validation.add_warning(
                    codes::SCRAPE_IMPORT_FAILED,
                    format!("external scrape failed, continuing with spreadsheet data: {failure}"),
                );
                true
            }
            ScrapeFailurePolicy::AbortWorkflow => {
                error!(reason = %failure, "scrape failed; aborting");
                out.validation
                    .add_error(codes::SCRAPE_IMPORT_FAILED, format!("external scrape failed: {failure}"));
                out.error = Some(WorkflowError::ScrapeImport(failure));
                false
            }
        }
    }

    async fn attach_summary(&self, out: &mut WorkflowResult, version_id: ScheduleVersionId) {
        if let Err(e) = self.versions.attach_validation_summary(version_id, &out.validation).await {
            warn!(error = %e, "validation summary not attached");
            out.validation.add_warning(codes::SUMMARY_ATTACH_FAILED, e.to_string());
        }
    }
}

// src/services/scrape_import.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ensure_import_target, ImportError};
use crate::config::PipelineConfig;
use crate::models::{
    Assignment, AssignmentSource, HospitalId, ImportBatch, ImportSource, PersonId, ScheduleVersionId,
    ShiftInstance, ShiftInstanceId,
};
use crate::repository::Repositories;
use crate::scrape::{norm, PersonDirectory, ScrapeProvider, ScrapeRecord, ScrapeWindow, ScrapedAssignment};
use crate::validation::{codes, ValidationResult};

pub struct ScrapeImportService {
    repos: Repositories,
    provider: Arc<dyn ScrapeProvider>,
    directory: Arc<dyn PersonDirectory>,
    workers: usize,
    interval: Duration,
}

impl ScrapeImportService {
    pub fn new(
        repos: Repositories,
        provider: Arc<dyn ScrapeProvider>,
        directory: Arc<dyn PersonDirectory>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            repos,
            provider,
            directory,
            workers: config.scrape_workers.max(1),
            interval: config.scrape_interval,
        }
    }

    /// Fetches every month window of the version, resolves records against the
    /// version's shifts and stores one assignment per matching shift.
    pub async fn import(
        &self,
        hospital_id: HospitalId,
        version_id: ScheduleVersionId,
        cancel: &CancellationToken,
    ) -> Result<(ImportBatch, ValidationResult), ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        // 1) Target must be a live STAGING version of this hospital
        let version = self.repos.versions.get_by_id(version_id).await?;
        ensure_import_target(&version, hospital_id)?;

        // 2) Open the batch
        let mut batch = ImportBatch::pending(ImportSource::ExternalScrape, &version);
        self.repos.batches.create(&batch).await?;
        let mut result = ValidationResult::new();
        result.set_context("scrape_batch_id", batch.id.to_string());

        // 3) Fan out over month windows
        let windows = ScrapeWindow::months(version.effective_start, version.effective_end);
        info!(batch_id = %batch.id, windows = windows.len(), workers = self.workers, "scrape import started");
        let fetched = self.fetch_all(windows.clone(), &mut result, cancel).await;
        let leftovers = self.provider.leftovers(&windows);
        if !leftovers.is_empty() {
            info!(
                batch_id = %batch.id,
                records = leftovers.len(),
                "provider holds records outside the requested windows"
            );
        }

        if cancel.is_cancelled() {
            self.fail(&mut batch, "cancelled").await?;
            return Err(ImportError::Cancelled);
        }

        // 4) Boundary validation
        let mut records = Vec::new();
        let sources = fetched
            .iter()
            .map(|(window, raw)| (window.to_string(), raw.as_slice()))
            .chain(std::iter::once(("outside requested windows".to_string(), leftovers.as_slice())));
        for (window, raw) in sources {
            for record in raw {
                match ScrapedAssignment::from_record(record) {
                    Ok(r) => records.push(r),
                    Err(reason) => {
                        result.add_warning_with_context(
                            codes::MALFORMED_SCRAPE_RECORD,
                            format!("record from {window} skipped: {reason}"),
                            json!({ "window": window, "record": record }),
                        );
                    }
                }
            }
        }

        if records.is_empty() && result.has_errors() {
            result.add_error(codes::NO_RECORDS_IMPORTED, "scrape produced no usable records");
            self.fail(&mut batch, "no usable records").await?;
            return Ok((batch, result));
        }

        // 5) One bulk read of the version's shifts, indexed by (date, shift type)
        let shifts = self
            .repos
            .shifts
            .list_by_version_in_range(version.id, version.effective_start, version.effective_end)
            .await?;
        let mut by_day_and_type: HashMap<(NaiveDate, String), Vec<&ShiftInstance>> = HashMap::new();
        for s in &shifts {
            by_day_and_type
                .entry((s.schedule_date, norm(&s.shift_type)))
                .or_default()
                .push(s);
        }

        // 6) Resolve and persist
        let mut seen: HashSet<(PersonId, ShiftInstanceId)> = HashSet::new();
        let mut persisted = 0usize;
        for rec in &records {
            let ctx = json!({
                "person": rec.person,
                "shift": rec.shift,
                "date": rec.date.to_string(),
            });

            if !version.covers(rec.date) {
                result.add_warning_with_context(
                    codes::DATE_OUTSIDE_WINDOW,
                    format!(
                        "{} on {} is outside {}..{}",
                        rec.person, rec.date, version.effective_start, version.effective_end
                    ),
                    ctx,
                );
                continue;
            }

            let Some(person_id) = self.directory.resolve(&rec.person) else {
                result.add_warning_with_context(
                    codes::UNKNOWN_PERSON,
                    format!("'{}' is not in the person directory", rec.person),
                    ctx,
                );
                continue;
            };

            let matching: Vec<&ShiftInstance> = by_day_and_type
                .get(&(rec.date, norm(&rec.shift)))
                .map(|v| {
                    v.iter()
                        .copied()
                        .filter(|s| rec.study.as_ref().map_or(true, |study| norm(study) == norm(&s.study_type)))
                        .collect()
                })
                .unwrap_or_default();
            if matching.is_empty() {
                let what = match &rec.study {
                    Some(study) => format!("'{}' ({})", rec.shift, study),
                    None => format!("'{}'", rec.shift),
                };
                result.add_warning_with_context(
                    codes::UNKNOWN_SHIFT_TYPE,
                    format!("no shift {} on {} in this version", what, rec.date),
                    ctx,
                );
                continue;
            }

            let mut duplicate = false;
            for shift in matching {
                if !seen.insert((person_id, shift.id)) {
                    duplicate = true;
                    continue;
                }
                let assignment = Assignment {
                    id: Uuid::new_v4(),
                    person_id,
                    shift_instance_id: shift.id,
                    schedule_date: rec.date,
                    original_shift_label: rec.label.clone(),
                    source: AssignmentSource::ExternalScrape,
                    created_at: Utc::now(),
                    created_by: version.created_by,
                    deleted_at: None,
                    deleted_by: None,
                };
                match self.repos.assignments.create(&assignment).await {
                    Ok(()) => persisted += 1,
                    Err(e) => {
                        result.add_warning_with_context(
                            codes::ASSIGNMENT_PERSIST_FAILED,
                            format!("could not store {} on {}: {}", rec.person, shift.position_key(), e),
                            ctx.clone(),
                        );
                    }
                }
            }
            if duplicate {
                result.add_warning_with_context(
                    codes::DUPLICATE_ASSIGNMENT,
                    format!("{} is listed more than once for '{}' on {}", rec.person, rec.shift, rec.date),
                    ctx,
                );
            }
        }

        batch.mark_complete(persisted)?;
        self.repos.batches.update(&batch).await?;
        info!(
            batch_id = %batch.id,
            persisted,
            records = records.len(),
            warnings = result.warning_count(),
            errors = result.error_count(),
            "scrape import complete"
        );
        Ok((batch, result))
    }

    /// Bounded concurrent fetch. Failing windows become ERRORs; the rest are
    /// returned in window order.
    async fn fetch_all(
        &self,
        windows: Vec<ScrapeWindow>,
        result: &mut ValidationResult,
        cancel: &CancellationToken,
    ) -> Vec<(ScrapeWindow, Vec<ScrapeRecord>)> {
        let limiter: Option<DefaultDirectRateLimiter> =
            Quota::with_period(self.interval).map(RateLimiter::direct);
        let sink = ValidationResult::shared();

        let mut fetched: Vec<(ScrapeWindow, Vec<ScrapeRecord>)> = stream::iter(windows)
            .map(|window| {
                let sink = sink.clone();
                let limiter = limiter.as_ref();
                let provider = self.provider.as_ref();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    if let Some(l) = limiter {
                        l.until_ready().await;
                    }
                    match provider.fetch_window(window).await {
                        Ok(records) => {
                            debug!(%window, records = records.len(), "window fetched");
                            Some((window, records))
                        }
                        Err(e) => {
                            warn!(%window, error = %e, "window fetch failed");
                            sink.add_error(
                                codes::SCRAPE_WINDOW_FAILED,
                                format!("window {window} failed: {e}"),
                                Some(json!({ "window": window.to_string() })),
                            );
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.workers)
            .filter_map(futures::future::ready)
            .collect()
            .await;

        sink.drain_into(result);
        fetched.sort_by_key(|(w, _)| w.start);
        fetched
    }

    async fn fail(&self, batch: &mut ImportBatch, reason: &str) -> Result<(), ImportError> {
        batch.mark_failed(reason)?;
        self.repos.batches.update(batch).await?;
        warn!(batch_id = %batch.id, reason, "scrape import failed");
        Ok(())
    }
}

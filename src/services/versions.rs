// src/services/versions.rs

//! STAGING -> PRODUCTION -> ARCHIVED.

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::info;

use crate::models::{HospitalId, ScheduleVersion, ScheduleVersionId, UserId, VersionStatus};
use crate::repository::{Repositories, RepositoryError};
use crate::validation::ValidationResult;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("schedule version {0} not found")]
    NotFound(ScheduleVersionId),
    #[error("effective end {end} is before effective start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("can only promote STAGING versions, current status: {0}")]
    CannotPromote(VersionStatus),
    #[error("can only archive PRODUCTION versions, current status: {0}")]
    CannotArchive(VersionStatus),
    #[error("cannot delete a PRODUCTION version; archive it first")]
    CannotDeleteProduction,
    #[error("can only attach validation to STAGING versions, current status: {0}")]
    SummaryOnNonStaging(VersionStatus),
    #[error("validation summary could not be serialized: {0}")]
    Summary(#[from] serde_json::Error),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for VersionError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound { id, .. } => VersionError::NotFound(id),
            other => VersionError::Repository(other),
        }
    }
}

pub struct ScheduleVersionService {
    repos: Repositories,
}

impl ScheduleVersionService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn create_version(
        &self,
        hospital_id: HospitalId,
        effective_start: NaiveDate,
        effective_end: NaiveDate,
        created_by: UserId,
    ) -> Result<ScheduleVersion, VersionError> {
        if effective_end < effective_start {
            return Err(VersionError::InvalidRange {
                start: effective_start,
                end: effective_end,
            });
        }
        let version = ScheduleVersion::new_staging(hospital_id, effective_start, effective_end, created_by);
        self.repos.versions.create(&version).await?;
        info!(version_id = %version.id, %hospital_id, "schedule version created");
        Ok(version)
    }

    /// Soft-deleted versions are reported as not found.
    pub async fn get_version(&self, id: ScheduleVersionId) -> Result<ScheduleVersion, VersionError> {
        let v = self.repos.versions.get_by_id(id).await?;
        if v.is_deleted() {
            return Err(VersionError::NotFound(id));
        }
        Ok(v)
    }

    /// The PRODUCTION version whose window contains `date`, if any.
    pub async fn get_active_version(
        &self,
        hospital_id: HospitalId,
        date: NaiveDate,
    ) -> Result<Option<ScheduleVersion>, VersionError> {
        let live = self
            .repos
            .versions
            .list_by_hospital_and_status(hospital_id, VersionStatus::Production)
            .await?;
        Ok(live.into_iter().find(|v| v.covers(date)))
    }

    pub async fn list_versions_by_status(
        &self,
        hospital_id: HospitalId,
        status: VersionStatus,
    ) -> Result<Vec<ScheduleVersion>, VersionError> {
        Ok(self.repos.versions.list_by_hospital_and_status(hospital_id, status).await?)
    }

    pub async fn list_all_versions(&self, hospital_id: HospitalId) -> Result<Vec<ScheduleVersion>, VersionError> {
        Ok(self.repos.versions.list_by_hospital(hospital_id).await?)
    }

    pub async fn promote(&self, id: ScheduleVersionId, by: UserId) -> Result<ScheduleVersion, VersionError> {
        let mut v = self.get_version(id).await?;
        if v.status != VersionStatus::Staging {
            return Err(VersionError::CannotPromote(v.status));
        }
        let now = Utc::now();
        v.status = VersionStatus::Production;
        v.promoted_at = Some(now);
        v.promoted_by = Some(by);
        v.updated_at = now;
        self.repos.versions.update(&v).await?;
        info!(version_id = %v.id, hospital_id = %v.hospital_id, "schedule version promoted");
        Ok(v)
    }

    pub async fn archive(&self, id: ScheduleVersionId, by: UserId) -> Result<ScheduleVersion, VersionError> {
        let mut v = self.get_version(id).await?;
        if v.status != VersionStatus::Production {
            return Err(VersionError::CannotArchive(v.status));
        }
        let now = Utc::now();
        v.status = VersionStatus::Archived;
        v.archived_at = Some(now);
        v.archived_by = Some(by);
        v.updated_at = now;
        self.repos.versions.update(&v).await?;
        info!(version_id = %v.id, hospital_id = %v.hospital_id, "schedule version archived");
        Ok(v)
    }

    /// Promotes `id`, then archives every other PRODUCTION version of the
    /// same hospital so exactly one remains live.
    pub async fn promote_and_archive_others(
        &self,
        id: ScheduleVersionId,
        by: UserId,
    ) -> Result<ScheduleVersion, VersionError> {
        let promoted = self.promote(id, by).await?;
        let others = self
            .repos
            .versions
            .list_by_hospital_and_status(promoted.hospital_id, VersionStatus::Production)
            .await?;
        for other in others.iter().filter(|v| v.id != promoted.id) {
            self.archive(other.id, by).await?;
        }
        Ok(promoted)
    }

    pub async fn soft_delete(&self, id: ScheduleVersionId, by: UserId) -> Result<(), VersionError> {
        let v = self.get_version(id).await?;
        if v.status == VersionStatus::Production {
            return Err(VersionError::CannotDeleteProduction);
        }
        self.repos.versions.soft_delete(id, by).await?;
        info!(version_id = %id, deleted_by = %by, "schedule version deleted");
        Ok(())
    }

    /// Stores the run's validation output on the version it produced.
    pub async fn attach_validation_summary(
        &self,
        id: ScheduleVersionId,
        result: &ValidationResult,
    ) -> Result<ScheduleVersion, VersionError> {
        let mut v = self.get_version(id).await?;
        if v.status != VersionStatus::Staging {
            return Err(VersionError::SummaryOnNonStaging(v.status));
        }
        v.validation_summary = Some(serde_json::to_value(result)?);
        v.updated_at = Utc::now();
        self.repos.versions.update(&v).await?;
        Ok(v)
    }
}

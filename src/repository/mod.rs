// src/repository/mod.rs

//! Storage seams. Services only ever see these traits; `memory` backs the
//! tests and `postgres` backs the worker binary.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Assignment, CoverageCalculation, HospitalId, ImportBatch, ScheduleVersion, ScheduleVersionId,
    ShiftInstance, ShiftInstanceId, UserId, VersionStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("stored {kind} row is invalid: {detail}")]
    Corrupt { kind: &'static str, detail: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait ScheduleVersionRepository: Send + Sync {
    async fn create(&self, version: &ScheduleVersion) -> RepoResult<()>;
    /// Soft-deleted rows are still returned; callers check `deleted_at`.
    async fn get_by_id(&self, id: ScheduleVersionId) -> RepoResult<ScheduleVersion>;
    async fn update(&self, version: &ScheduleVersion) -> RepoResult<()>;
    async fn soft_delete(&self, id: ScheduleVersionId, by: UserId) -> RepoResult<()>;
    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ScheduleVersion>>;
    async fn list_by_hospital_and_status(
        &self,
        hospital_id: HospitalId,
        status: VersionStatus,
    ) -> RepoResult<Vec<ScheduleVersion>>;
}

#[async_trait]
pub trait ShiftInstanceRepository: Send + Sync {
    async fn create(&self, shift: &ShiftInstance) -> RepoResult<()>;
    async fn get_by_id(&self, id: ShiftInstanceId) -> RepoResult<ShiftInstance>;
    async fn update(&self, shift: &ShiftInstance) -> RepoResult<()>;
    async fn soft_delete(&self, id: ShiftInstanceId, by: UserId) -> RepoResult<()>;
    /// Bulk read: every live shift of the version dated inside `[start, end]`,
    /// in one round trip.
    async fn list_by_version_in_range(
        &self,
        version_id: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepoResult<Vec<ShiftInstance>>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, assignment: &Assignment) -> RepoResult<()>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<Assignment>;
    async fn update(&self, assignment: &Assignment) -> RepoResult<()>;
    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()>;
    /// Bulk read: every assignment (soft-deleted included) whose shift is in
    /// `shift_ids`, in one round trip regardless of how many ids are given.
    async fn list_by_shift_ids(&self, shift_ids: &[ShiftInstanceId]) -> RepoResult<Vec<Assignment>>;
}

#[async_trait]
pub trait ImportBatchRepository: Send + Sync {
    async fn create(&self, batch: &ImportBatch) -> RepoResult<()>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<ImportBatch>;
    async fn update(&self, batch: &ImportBatch) -> RepoResult<()>;
    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()>;
    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ImportBatch>>;
}

/// Calculations are write-once; there is no `update`.
#[async_trait]
pub trait CoverageCalculationRepository: Send + Sync {
    async fn create(&self, calculation: &CoverageCalculation) -> RepoResult<()>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<CoverageCalculation>;
    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()>;
    /// Live calculations for the version, oldest first.
    async fn list_by_version(&self, version_id: ScheduleVersionId) -> RepoResult<Vec<CoverageCalculation>>;
}

/// The full set of stores a pipeline run talks to.
#[derive(Clone)]
pub struct Repositories {
    pub versions: Arc<dyn ScheduleVersionRepository>,
    pub shifts: Arc<dyn ShiftInstanceRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub batches: Arc<dyn ImportBatchRepository>,
    pub coverage: Arc<dyn CoverageCalculationRepository>,
}

impl Repositories {
    /// One backing object serving every entity.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ScheduleVersionRepository
            + ShiftInstanceRepository
            + AssignmentRepository
            + ImportBatchRepository
            + CoverageCalculationRepository
            + 'static,
    {
        Self {
            versions: store.clone(),
            shifts: store.clone(),
            assignments: store.clone(),
            batches: store.clone(),
            coverage: store,
        }
    }
}

// src/repository/memory.rs

//! In-process store. Every call is appended to a query log so tests can
//! assert exactly which round trips a service made.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AssignmentRepository, CoverageCalculationRepository, ImportBatchRepository, RepoResult,
    Repositories, RepositoryError, ScheduleVersionRepository, ShiftInstanceRepository,
};
use crate::models::{
    Assignment, CoverageCalculation, HospitalId, ImportBatch, ScheduleVersion, ScheduleVersionId,
    ShiftInstance, ShiftInstanceId, UserId, VersionStatus,
};

type ShiftFilter = Box<dyn Fn(&ShiftInstance) -> bool + Send + Sync>;

#[derive(Default)]
struct Faults {
    version_create: AtomicBool,
    shift_reads: AtomicBool,
    shift_writes: Mutex<Option<ShiftFilter>>,
}

#[derive(Default)]
pub struct MemoryStore {
    versions: RwLock<Vec<ScheduleVersion>>,
    shifts: RwLock<Vec<ShiftInstance>>,
    assignments: RwLock<Vec<Assignment>>,
    batches: RwLock<Vec<ImportBatch>>,
    coverage: RwLock<Vec<CoverageCalculation>>,
    log: Mutex<Vec<&'static str>>,
    faults: Faults,
}

fn injected(op: &str) -> RepositoryError {
    RepositoryError::Rejected(format!("injected fault on {op}"))
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories::from_store(self.clone())
    }

    fn record(&self, op: &'static str) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }

    /// Operations issued since the last reset, in call order.
    pub fn queries(&self) -> Vec<&'static str> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn query_count(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn reset_query_log(&self) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Fault injection
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn fail_version_creates(&self, on: bool) {
        self.faults.version_create.store(on, Ordering::SeqCst);
    }

    pub fn fail_shift_reads(&self, on: bool) {
        self.faults.shift_reads.store(on, Ordering::SeqCst);
    }

    /// Shift writes matching `filter` are rejected.
    pub fn fail_shift_writes_when(&self, filter: impl Fn(&ShiftInstance) -> bool + Send + Sync + 'static) {
        *self.faults.shift_writes.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(filter));
    }

    fn shift_write_blocked(&self, shift: &ShiftInstance) -> bool {
        self.faults
            .shift_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|f| f(shift))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Direct inspection (bypasses the query log)
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn all_shifts(&self) -> Vec<ShiftInstance> {
        self.shifts.read().await.clone()
    }

    pub async fn all_assignments(&self) -> Vec<Assignment> {
        self.assignments.read().await.clone()
    }

    pub async fn all_batches(&self) -> Vec<ImportBatch> {
        self.batches.read().await.clone()
    }
}

// Mutable lookup by id, shared by every entity.
macro_rules! find_mut {
    ($rows:expr, $id:expr, $kind:literal) => {
        $rows
            .iter_mut()
            .find(|r| r.id == $id)
            .ok_or(RepositoryError::NotFound { kind: $kind, id: $id })
    };
}

fn insert_unique<T>(rows: &mut Vec<T>, row: &T, id_of: impl Fn(&T) -> Uuid, kind: &str) -> RepoResult<()>
where
    T: Clone,
{
    let id = id_of(row);
    if rows.iter().any(|r| id_of(r) == id) {
        return Err(RepositoryError::Rejected(format!("{kind} {id} already exists")));
    }
    rows.push(row.clone());
    Ok(())
}

#[async_trait]
impl ScheduleVersionRepository for MemoryStore {
    async fn create(&self, version: &ScheduleVersion) -> RepoResult<()> {
        self.record("schedule_versions.create");
        if self.faults.version_create.load(Ordering::SeqCst) {
            return Err(injected("schedule_versions.create"));
        }
        insert_unique(&mut *self.versions.write().await, version, |v| v.id, "schedule version")
    }

    async fn get_by_id(&self, id: ScheduleVersionId) -> RepoResult<ScheduleVersion> {
        self.record("schedule_versions.get_by_id");
        let rows = self.versions.read().await;
        rows.iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { kind: "schedule version", id })
    }

    async fn update(&self, version: &ScheduleVersion) -> RepoResult<()> {
        self.record("schedule_versions.update");
        let mut rows = self.versions.write().await;
        let row = find_mut!(rows, version.id, "schedule version")?;
        *row = version.clone();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete(&self, id: ScheduleVersionId, by: UserId) -> RepoResult<()> {
        self.record("schedule_versions.soft_delete");
        let mut rows = self.versions.write().await;
        let row = find_mut!(rows, id, "schedule version")?;
        let now = Utc::now();
        row.deleted_at = Some(now);
        row.deleted_by = Some(by);
        row.updated_at = now;
        Ok(())
    }

    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ScheduleVersion>> {
        self.record("schedule_versions.list_by_hospital");
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .filter(|v| v.hospital_id == hospital_id && !v.is_deleted())
            .cloned()
            .collect())
    }

    async fn list_by_hospital_and_status(
        &self,
        hospital_id: HospitalId,
        status: VersionStatus,
    ) -> RepoResult<Vec<ScheduleVersion>> {
        self.record("schedule_versions.list_by_hospital_and_status");
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .filter(|v| v.hospital_id == hospital_id && v.status == status && !v.is_deleted())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ShiftInstanceRepository for MemoryStore {
    async fn create(&self, shift: &ShiftInstance) -> RepoResult<()> {
        self.record("shift_instances.create");
        if self.shift_write_blocked(shift) {
            return Err(injected("shift_instances.create"));
        }
        insert_unique(&mut *self.shifts.write().await, shift, |s| s.id, "shift instance")
    }

    async fn get_by_id(&self, id: ShiftInstanceId) -> RepoResult<ShiftInstance> {
        self.record("shift_instances.get_by_id");
        let rows = self.shifts.read().await;
        rows.iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { kind: "shift instance", id })
    }

    async fn update(&self, shift: &ShiftInstance) -> RepoResult<()> {
        self.record("shift_instances.update");
        if self.shift_write_blocked(shift) {
            return Err(injected("shift_instances.update"));
        }
        let mut rows = self.shifts.write().await;
        let row = find_mut!(rows, shift.id, "shift instance")?;
        *row = shift.clone();
        Ok(())
    }

    async fn soft_delete(&self, id: ShiftInstanceId, by: UserId) -> RepoResult<()> {
        self.record("shift_instances.soft_delete");
        let mut rows = self.shifts.write().await;
        let row = find_mut!(rows, id, "shift instance")?;
        row.deleted_at = Some(Utc::now());
        row.deleted_by = Some(by);
        Ok(())
    }

    async fn list_by_version_in_range(
        &self,
        version_id: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepoResult<Vec<ShiftInstance>> {
        self.record("shift_instances.list_by_version_in_range");
        if self.faults.shift_reads.load(Ordering::SeqCst) {
            return Err(injected("shift_instances.list_by_version_in_range"));
        }
        let mut out: Vec<ShiftInstance> = self
            .shifts
            .read()
            .await
            .iter()
            .filter(|s| {
                s.schedule_version_id == version_id
                    && !s.is_deleted()
                    && start <= s.schedule_date
                    && s.schedule_date <= end
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.schedule_date.cmp(&b.schedule_date));
        Ok(out)
    }
}

#[async_trait]
impl AssignmentRepository for MemoryStore {
    async fn create(&self, assignment: &Assignment) -> RepoResult<()> {
        self.record("assignments.create");
        insert_unique(&mut *self.assignments.write().await, assignment, |a| a.id, "assignment")
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<Assignment> {
        self.record("assignments.get_by_id");
        let rows = self.assignments.read().await;
        rows.iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { kind: "assignment", id })
    }

    async fn update(&self, assignment: &Assignment) -> RepoResult<()> {
        self.record("assignments.update");
        let mut rows = self.assignments.write().await;
        let row = find_mut!(rows, assignment.id, "assignment")?;
        *row = assignment.clone();
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()> {
        self.record("assignments.soft_delete");
        let mut rows = self.assignments.write().await;
        let row = find_mut!(rows, id, "assignment")?;
        row.deleted_at = Some(Utc::now());
        row.deleted_by = Some(by);
        Ok(())
    }

    async fn list_by_shift_ids(&self, shift_ids: &[ShiftInstanceId]) -> RepoResult<Vec<Assignment>> {
        self.record("assignments.list_by_shift_ids");
        let wanted: HashSet<&ShiftInstanceId> = shift_ids.iter().collect();
        Ok(self
            .assignments
            .read()
            .await
            .iter()
            .filter(|a| wanted.contains(&a.shift_instance_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ImportBatchRepository for MemoryStore {
    async fn create(&self, batch: &ImportBatch) -> RepoResult<()> {
        self.record("import_batches.create");
        insert_unique(&mut *self.batches.write().await, batch, |b| b.id, "import batch")
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<ImportBatch> {
        self.record("import_batches.get_by_id");
        let rows = self.batches.read().await;
        rows.iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { kind: "import batch", id })
    }

    async fn update(&self, batch: &ImportBatch) -> RepoResult<()> {
        self.record("import_batches.update");
        let mut rows = self.batches.write().await;
        let row = find_mut!(rows, batch.id, "import batch")?;
        *row = batch.clone();
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()> {
        self.record("import_batches.soft_delete");
        let mut rows = self.batches.write().await;
        let row = find_mut!(rows, id, "import batch")?;
        row.deleted_at = Some(Utc::now());
        row.deleted_by = Some(by);
        Ok(())
    }

    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ImportBatch>> {
        self.record("import_batches.list_by_hospital");
        Ok(self
            .batches
            .read()
            .await
            .iter()
            .filter(|b| b.hospital_id == hospital_id && b.deleted_at.is_none())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CoverageCalculationRepository for MemoryStore {
    async fn create(&self, calculation: &CoverageCalculation) -> RepoResult<()> {
        self.record("coverage_calculations.create");
        insert_unique(&mut *self.coverage.write().await, calculation, |c| c.id, "coverage calculation")
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<CoverageCalculation> {
        self.record("coverage_calculations.get_by_id");
        let rows = self.coverage.read().await;
        rows.iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { kind: "coverage calculation", id })
    }

    async fn soft_delete(&self, id: Uuid, _by: UserId) -> RepoResult<()> {
        self.record("coverage_calculations.soft_delete");
        let mut rows = self.coverage.write().await;
        let row = find_mut!(rows, id, "coverage calculation")?;
        row.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn list_by_version(&self, version_id: ScheduleVersionId) -> RepoResult<Vec<CoverageCalculation>> {
        self.record("coverage_calculations.list_by_version");
        let mut out: Vec<CoverageCalculation> = self
            .coverage
            .read()
            .await
            .iter()
            .filter(|c| c.schedule_version_id == version_id && c.deleted_at.is_none())
            .cloned()
            .collect();
        out.sort_by_key(|c| c.calculated_at);
        Ok(out)
    }
}

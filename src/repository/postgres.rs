// src/repository/postgres.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use sqlx::{query, query_as, FromRow, PgPool};
use uuid::Uuid;

use super::{
    AssignmentRepository, CoverageCalculationRepository, ImportBatchRepository, RepoResult,
    Repositories, RepositoryError, ScheduleVersionRepository, ShiftInstanceRepository,
};
use crate::models::{
    Assignment, CoverageCalculation, CoverageSummary, HospitalId, ImportBatch, PositionCoverage,
    ScheduleVersion, ScheduleVersionId, ShiftInstance, ShiftInstanceId, UserId, VersionStatus,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories::from_store(self.clone())
    }
}

fn corrupt(kind: &'static str) -> impl Fn(String) -> RepositoryError {
    move |detail| RepositoryError::Corrupt { kind, detail }
}

fn not_found(kind: &'static str, id: Uuid) -> RepositoryError {
    RepositoryError::NotFound { kind, id }
}

fn expect_one(kind: &'static str, id: Uuid, affected: u64) -> RepoResult<()> {
    if affected == 0 {
        return Err(not_found(kind, id));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row shapes (status columns are TEXT)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct VersionRow {
    id: Uuid,
    hospital_id: Uuid,
    status: String, // STAGING|PRODUCTION|ARCHIVED
    effective_start: NaiveDate,
    effective_end: NaiveDate,
    validation_summary: Option<Value>,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    updated_at: DateTime<Utc>,
    promoted_at: Option<DateTime<Utc>>,
    promoted_by: Option<Uuid>,
    archived_at: Option<DateTime<Utc>>,
    archived_by: Option<Uuid>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl TryFrom<VersionRow> for ScheduleVersion {
    type Error = RepositoryError;

    fn try_from(r: VersionRow) -> Result<Self, Self::Error> {
        Ok(ScheduleVersion {
            id: r.id,
            hospital_id: r.hospital_id,
            status: r.status.parse().map_err(|e: crate::models::UnknownVariant| corrupt("schedule version")(e.to_string()))?,
            effective_start: r.effective_start,
            effective_end: r.effective_end,
            validation_summary: r.validation_summary,
            created_at: r.created_at,
            created_by: r.created_by,
            updated_at: r.updated_at,
            promoted_at: r.promoted_at,
            promoted_by: r.promoted_by,
            archived_at: r.archived_at,
            archived_by: r.archived_by,
            deleted_at: r.deleted_at,
            deleted_by: r.deleted_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct ShiftRow {
    id: Uuid,
    schedule_version_id: Uuid,
    hospital_id: Uuid,
    site_code: String,
    shift_type: String,
    schedule_date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    study_type: String,
    specialty_constraint: String, // BODY_ONLY|NEURO_ONLY|BOTH
    desired_coverage: i32,
    is_mandatory: bool,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl TryFrom<ShiftRow> for ShiftInstance {
    type Error = RepositoryError;

    fn try_from(r: ShiftRow) -> Result<Self, Self::Error> {
        Ok(ShiftInstance {
            id: r.id,
            schedule_version_id: r.schedule_version_id,
            hospital_id: r.hospital_id,
            site_code: r.site_code,
            shift_type: r.shift_type,
            schedule_date: r.schedule_date,
            start_time: r.start_time,
            end_time: r.end_time,
            study_type: r.study_type,
            specialty_constraint: r
                .specialty_constraint
                .parse()
                .map_err(|e: crate::models::UnknownVariant| corrupt("shift instance")(e.to_string()))?,
            desired_coverage: r.desired_coverage,
            is_mandatory: r.is_mandatory,
            created_at: r.created_at,
            created_by: r.created_by,
            deleted_at: r.deleted_at,
            deleted_by: r.deleted_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    person_id: Uuid,
    shift_instance_id: Uuid,
    schedule_date: NaiveDate,
    original_shift_label: String,
    source: String, // MANUAL|EXTERNAL_SCRAPE|OVERRIDE
    created_at: DateTime<Utc>,
    created_by: Uuid,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = RepositoryError;

    fn try_from(r: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Assignment {
            id: r.id,
            person_id: r.person_id,
            shift_instance_id: r.shift_instance_id,
            schedule_date: r.schedule_date,
            original_shift_label: r.original_shift_label,
            source: r.source.parse().map_err(|e: crate::models::UnknownVariant| corrupt("assignment")(e.to_string()))?,
            created_at: r.created_at,
            created_by: r.created_by,
            deleted_at: r.deleted_at,
            deleted_by: r.deleted_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    hospital_id: Uuid,
    schedule_version_id: Uuid,
    source: String, // ODS_FILE|EXTERNAL_SCRAPE
    state: String,  // PENDING|COMPLETE|FAILED
    window_start: NaiveDate,
    window_end: NaiveDate,
    row_count: i32,
    ingest_checksum: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    completed_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl TryFrom<BatchRow> for ImportBatch {
    type Error = RepositoryError;

    fn try_from(r: BatchRow) -> Result<Self, Self::Error> {
        let bad = |e: crate::models::UnknownVariant| corrupt("import batch")(e.to_string());
        Ok(ImportBatch {
            id: r.id,
            hospital_id: r.hospital_id,
            schedule_version_id: r.schedule_version_id,
            source: r.source.parse().map_err(bad)?,
            state: r.state.parse().map_err(bad)?,
            window_start: r.window_start,
            window_end: r.window_end,
            row_count: r.row_count,
            ingest_checksum: r.ingest_checksum,
            error_message: r.error_message,
            created_at: r.created_at,
            created_by: r.created_by,
            completed_at: r.completed_at,
            deleted_at: r.deleted_at,
            deleted_by: r.deleted_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct CoverageRow {
    id: Uuid,
    schedule_version_id: Uuid,
    hospital_id: Option<Uuid>,
    period_start: NaiveDate,
    period_end: NaiveDate,
    coverage_by_position: Value,
    summary: Value,
    query_count: i32,
    calculated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<CoverageRow> for CoverageCalculation {
    type Error = RepositoryError;

    fn try_from(r: CoverageRow) -> Result<Self, Self::Error> {
        let positions: BTreeMap<String, PositionCoverage> = serde_json::from_value(r.coverage_by_position)
            .map_err(|e| corrupt("coverage calculation")(e.to_string()))?;
        let summary = CoverageSummary::from_value(&r.summary)
            .map_err(|e| corrupt("coverage calculation")(e.to_string()))?;
        Ok(CoverageCalculation {
            id: r.id,
            schedule_version_id: r.schedule_version_id,
            hospital_id: r.hospital_id,
            period_start: r.period_start,
            period_end: r.period_end,
            coverage_by_position: positions,
            summary,
            query_count: r.query_count,
            calculated_at: r.calculated_at,
            deleted_at: r.deleted_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> RepoResult<Vec<T>>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedule versions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ScheduleVersionRepository for PgStore {
    async fn create(&self, v: &ScheduleVersion) -> RepoResult<()> {
        query(
            r#"
            INSERT INTO schedule_versions
              (id, hospital_id, status, effective_start, effective_end, validation_summary,
               created_at, created_by, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(v.id)
        .bind(v.hospital_id)
        .bind(v.status.as_str())
        .bind(v.effective_start)
        .bind(v.effective_end)
        .bind(&v.validation_summary)
        .bind(v.created_at)
        .bind(v.created_by)
        .bind(v.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: ScheduleVersionId) -> RepoResult<ScheduleVersion> {
        let row = query_as::<_, VersionRow>(
            r#"
            SELECT id, hospital_id, status, effective_start, effective_end, validation_summary,
                   created_at, created_by, updated_at, promoted_at, promoted_by,
                   archived_at, archived_by, deleted_at, deleted_by
            FROM schedule_versions WHERE id=$1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("schedule version", id))?;
        row.try_into()
    }

    async fn update(&self, v: &ScheduleVersion) -> RepoResult<()> {
        let res = query(
            r#"
            UPDATE schedule_versions SET
              status=$2, effective_start=$3, effective_end=$4, validation_summary=$5,
              promoted_at=$6, promoted_by=$7, archived_at=$8, archived_by=$9,
              deleted_at=$10, deleted_by=$11, updated_at=now()
            WHERE id=$1
            "#,
        )
        .bind(v.id)
        .bind(v.status.as_str())
        .bind(v.effective_start)
        .bind(v.effective_end)
        .bind(&v.validation_summary)
        .bind(v.promoted_at)
        .bind(v.promoted_by)
        .bind(v.archived_at)
        .bind(v.archived_by)
        .bind(v.deleted_at)
        .bind(v.deleted_by)
        .execute(&self.pool)
        .await?;
        expect_one("schedule version", v.id, res.rows_affected())
    }

    async fn soft_delete(&self, id: ScheduleVersionId, by: UserId) -> RepoResult<()> {
        let res = query(
            r#"UPDATE schedule_versions SET deleted_at=now(), deleted_by=$2, updated_at=now() WHERE id=$1"#,
        )
        .bind(id)
        .bind(by)
        .execute(&self.pool)
        .await?;
        expect_one("schedule version", id, res.rows_affected())
    }

    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ScheduleVersion>> {
        let rows = query_as::<_, VersionRow>(
            r#"
            SELECT id, hospital_id, status, effective_start, effective_end, validation_summary,
                   created_at, created_by, updated_at, promoted_at, promoted_by,
                   archived_at, archived_by, deleted_at, deleted_by
            FROM schedule_versions
            WHERE hospital_id=$1 AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(hospital_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_by_hospital_and_status(
        &self,
        hospital_id: HospitalId,
        status: VersionStatus,
    ) -> RepoResult<Vec<ScheduleVersion>> {
        let rows = query_as::<_, VersionRow>(
            r#"
            SELECT id, hospital_id, status, effective_start, effective_end, validation_summary,
                   created_at, created_by, updated_at, promoted_at, promoted_by,
                   archived_at, archived_by, deleted_at, deleted_by
            FROM schedule_versions
            WHERE hospital_id=$1 AND status=$2 AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(hospital_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shift instances
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ShiftInstanceRepository for PgStore {
    async fn create(&self, s: &ShiftInstance) -> RepoResult<()> {
        query(
            r#"
            INSERT INTO shift_instances
              (id, schedule_version_id, hospital_id, site_code, shift_type, schedule_date,
               start_time, end_time, study_type, specialty_constraint, desired_coverage,
               is_mandatory, created_at, created_by)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(s.id)
        .bind(s.schedule_version_id)
        .bind(s.hospital_id)
        .bind(&s.site_code)
        .bind(&s.shift_type)
        .bind(s.schedule_date)
        .bind(s.start_time)
        .bind(s.end_time)
        .bind(&s.study_type)
        .bind(s.specialty_constraint.as_str())
        .bind(s.desired_coverage)
        .bind(s.is_mandatory)
        .bind(s.created_at)
        .bind(s.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: ShiftInstanceId) -> RepoResult<ShiftInstance> {
        let row = query_as::<_, ShiftRow>(
            r#"
            SELECT id, schedule_version_id, hospital_id, site_code, shift_type, schedule_date,
                   start_time, end_time, study_type, specialty_constraint, desired_coverage,
                   is_mandatory, created_at, created_by, deleted_at, deleted_by
            FROM shift_instances WHERE id=$1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("shift instance", id))?;
        row.try_into()
    }

    async fn update(&self, s: &ShiftInstance) -> RepoResult<()> {
        let res = query(
            r#"
            UPDATE shift_instances SET
              site_code=$2, shift_type=$3, schedule_date=$4, start_time=$5, end_time=$6,
              study_type=$7, specialty_constraint=$8, desired_coverage=$9, is_mandatory=$10
            WHERE id=$1
            "#,
        )
        .bind(s.id)
        .bind(&s.site_code)
        .bind(&s.shift_type)
        .bind(s.schedule_date)
        .bind(s.start_time)
        .bind(s.end_time)
        .bind(&s.study_type)
        .bind(s.specialty_constraint.as_str())
        .bind(s.desired_coverage)
        .bind(s.is_mandatory)
        .execute(&self.pool)
        .await?;
        expect_one("shift instance", s.id, res.rows_affected())
    }

    async fn soft_delete(&self, id: ShiftInstanceId, by: UserId) -> RepoResult<()> {
        let res = query(r#"UPDATE shift_instances SET deleted_at=now(), deleted_by=$2 WHERE id=$1"#)
            .bind(id)
            .bind(by)
            .execute(&self.pool)
            .await?;
        expect_one("shift instance", id, res.rows_affected())
    }

    async fn list_by_version_in_range(
        &self,
        version_id: ScheduleVersionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepoResult<Vec<ShiftInstance>> {
        let rows = query_as::<_, ShiftRow>(
            r#"
            SELECT id, schedule_version_id, hospital_id, site_code, shift_type, schedule_date,
                   start_time, end_time, study_type, specialty_constraint, desired_coverage,
                   is_mandatory, created_at, created_by, deleted_at, deleted_by
            FROM shift_instances
            WHERE schedule_version_id=$1
              AND schedule_date BETWEEN $2 AND $3
              AND deleted_at IS NULL
            ORDER BY schedule_date, shift_type
            "#,
        )
        .bind(version_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignments
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AssignmentRepository for PgStore {
    async fn create(&self, a: &Assignment) -> RepoResult<()> {
        query(
            r#"
            INSERT INTO assignments
              (id, person_id, shift_instance_id, schedule_date, original_shift_label, source,
               created_at, created_by)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(a.id)
        .bind(a.person_id)
        .bind(a.shift_instance_id)
        .bind(a.schedule_date)
        .bind(&a.original_shift_label)
        .bind(a.source.as_str())
        .bind(a.created_at)
        .bind(a.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<Assignment> {
        let row = query_as::<_, AssignmentRow>(
            r#"
            SELECT id, person_id, shift_instance_id, schedule_date, original_shift_label, source,
                   created_at, created_by, deleted_at, deleted_by
            FROM assignments WHERE id=$1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("assignment", id))?;
        row.try_into()
    }

    // original_shift_label is never rewritten.
    async fn update(&self, a: &Assignment) -> RepoResult<()> {
        let res = query(
            r#"UPDATE assignments SET person_id=$2, shift_instance_id=$3, schedule_date=$4, source=$5 WHERE id=$1"#,
        )
        .bind(a.id)
        .bind(a.person_id)
        .bind(a.shift_instance_id)
        .bind(a.schedule_date)
        .bind(a.source.as_str())
        .execute(&self.pool)
        .await?;
        expect_one("assignment", a.id, res.rows_affected())
    }

    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()> {
        let res = query(r#"UPDATE assignments SET deleted_at=now(), deleted_by=$2 WHERE id=$1"#)
            .bind(id)
            .bind(by)
            .execute(&self.pool)
            .await?;
        expect_one("assignment", id, res.rows_affected())
    }

    async fn list_by_shift_ids(&self, shift_ids: &[ShiftInstanceId]) -> RepoResult<Vec<Assignment>> {
        let rows = query_as::<_, AssignmentRow>(
            r#"
            SELECT id, person_id, shift_instance_id, schedule_date, original_shift_label, source,
                   created_at, created_by, deleted_at, deleted_by
            FROM assignments
            WHERE shift_instance_id = ANY($1)
            "#,
        )
        .bind(shift_ids)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Import batches
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ImportBatchRepository for PgStore {
    async fn create(&self, b: &ImportBatch) -> RepoResult<()> {
        query(
            r#"
            INSERT INTO import_batches
              (id, hospital_id, schedule_version_id, source, state, window_start, window_end,
               row_count, ingest_checksum, error_message, created_at, created_by, completed_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(b.id)
        .bind(b.hospital_id)
        .bind(b.schedule_version_id)
        .bind(b.source.as_str())
        .bind(b.state.as_str())
        .bind(b.window_start)
        .bind(b.window_end)
        .bind(b.row_count)
        .bind(&b.ingest_checksum)
        .bind(&b.error_message)
        .bind(b.created_at)
        .bind(b.created_by)
        .bind(b.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<ImportBatch> {
        let row = query_as::<_, BatchRow>(
            r#"
            SELECT id, hospital_id, schedule_version_id, source, state, window_start, window_end,
                   row_count, ingest_checksum, error_message, created_at, created_by,
                   completed_at, deleted_at, deleted_by
            FROM import_batches WHERE id=$1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("import batch", id))?;
        row.try_into()
    }

    async fn update(&self, b: &ImportBatch) -> RepoResult<()> {
        let res = query(
            r#"
            UPDATE import_batches SET
              state=$2, row_count=$3, ingest_checksum=$4, error_message=$5, completed_at=$6
            WHERE id=$1
            "#,
        )
        .bind(b.id)
        .bind(b.state.as_str())
        .bind(b.row_count)
        .bind(&b.ingest_checksum)
        .bind(&b.error_message)
        .bind(b.completed_at)
        .execute(&self.pool)
        .await?;
        expect_one("import batch", b.id, res.rows_affected())
    }

    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()> {
        let res = query(r#"UPDATE import_batches SET deleted_at=now(), deleted_by=$2 WHERE id=$1"#)
            .bind(id)
            .bind(by)
            .execute(&self.pool)
            .await?;
        expect_one("import batch", id, res.rows_affected())
    }

    async fn list_by_hospital(&self, hospital_id: HospitalId) -> RepoResult<Vec<ImportBatch>> {
        let rows = query_as::<_, BatchRow>(
            r#"
            SELECT id, hospital_id, schedule_version_id, source, state, window_start, window_end,
                   row_count, ingest_checksum, error_message, created_at, created_by,
                   completed_at, deleted_at, deleted_by
            FROM import_batches
            WHERE hospital_id=$1 AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(hospital_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coverage calculations (write-once)
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CoverageCalculationRepository for PgStore {
    async fn create(&self, c: &CoverageCalculation) -> RepoResult<()> {
        let positions = serde_json::to_value(&c.coverage_by_position)
            .map_err(|e| RepositoryError::Rejected(e.to_string()))?;
        let summary = serde_json::to_value(&c.summary).map_err(|e| RepositoryError::Rejected(e.to_string()))?;
        query(
            r#"
            INSERT INTO coverage_calculations
              (id, schedule_version_id, hospital_id, period_start, period_end,
               coverage_by_position, summary, query_count, calculated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(c.id)
        .bind(c.schedule_version_id)
        .bind(c.hospital_id)
        .bind(c.period_start)
        .bind(c.period_end)
        .bind(positions)
        .bind(summary)
        .bind(c.query_count)
        .bind(c.calculated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<CoverageCalculation> {
        let row = query_as::<_, CoverageRow>(
            r#"
            SELECT id, schedule_version_id, hospital_id, period_start, period_end,
                   coverage_by_position, summary, query_count, calculated_at, deleted_at
            FROM coverage_calculations WHERE id=$1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("coverage calculation", id))?;
        row.try_into()
    }

    async fn soft_delete(&self, id: Uuid, by: UserId) -> RepoResult<()> {
        let res = query(r#"UPDATE coverage_calculations SET deleted_at=now(), deleted_by=$2 WHERE id=$1"#)
            .bind(id)
            .bind(by)
            .execute(&self.pool)
            .await?;
        expect_one("coverage calculation", id, res.rows_affected())
    }

    async fn list_by_version(&self, version_id: ScheduleVersionId) -> RepoResult<Vec<CoverageCalculation>> {
        let rows = query_as::<_, CoverageRow>(
            r#"
            SELECT id, schedule_version_id, hospital_id, period_start, period_end,
                   coverage_by_position, summary, query_count, calculated_at, deleted_at
            FROM coverage_calculations
            WHERE schedule_version_id=$1 AND deleted_at IS NULL
            ORDER BY calculated_at
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

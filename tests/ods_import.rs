// tests/ods_import.rs

mod common;

use chrono::{Datelike, NaiveTime, Weekday};
use common::{day, Harness, OdsBuilder};
use tokio_util::sync::CancellationToken;

use schedcu_import::models::{BatchState, SpecialtyConstraint};
use schedcu_import::services::{CoverageCalculator, ImportError, OdsImportService, OdsSource};
use schedcu_import::validation::codes;

fn bytes_source(bytes: Vec<u8>) -> OdsSource {
    OdsSource::Bytes {
        name: "schedule.ods".into(),
        bytes,
    }
}

/// 500 data rows under one "Mid" column; rows listed in `bad` carry an
/// unreadable marker.
fn large_sheet(bad: &[usize]) -> Vec<u8> {
    let mut rows = vec![vec![String::new(), "Mid".to_string()]];
    for i in 0..500 {
        let marker = if bad.contains(&i) { "?" } else { "x" };
        rows.push(vec![format!("CPMC CT{i}"), marker.to_string()]);
    }
    OdsBuilder::new().sheet("Mid Weekday Body", &rows).build()
}

#[tokio::test]
async fn large_sheet_with_two_bad_markers_imports_the_rest() {
    // Given: a one-day window on a Monday and 500 rows, two malformed
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    assert_eq!(monday.weekday(), Weekday::Mon);
    let version = h.staging(monday, monday).await;
    let service = OdsImportService::new(h.repos.clone());

    // When
    let (batch, result) = service
        .import(h.hospital, version.id, bytes_source(large_sheet(&[17, 401])), &CancellationToken::new())
        .await
        .expect("import runs");

    // Then: the batch completes with 498 rows and exactly two warnings
    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 498);
    assert!(batch.ingest_checksum.as_deref().is_some_and(|c| c.len() == 64));
    assert_eq!(result.warning_count(), 2);
    assert_eq!(result.messages_by_code(codes::INVALID_COVERAGE_MARKER).count(), 2);
    assert!(!result.has_errors());
    assert_eq!(h.store.all_shifts().await.len(), 498);
}

#[tokio::test]
async fn reimport_into_fresh_version_is_identical() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let first = h.staging(monday, monday).await;
    let second = h.staging(monday, monday).await;
    let service = OdsImportService::new(h.repos.clone());
    let bytes = large_sheet(&[3]);
    let cancel = CancellationToken::new();

    let (a, ra) = service
        .import(h.hospital, first.id, bytes_source(bytes.clone()), &cancel)
        .await
        .expect("first import");
    let (b, rb) = service
        .import(h.hospital, second.id, bytes_source(bytes), &cancel)
        .await
        .expect("second import");

    assert_eq!(a.row_count, b.row_count);
    assert_eq!(a.ingest_checksum, b.ingest_checksum);
    assert_eq!(ra.warning_count(), rb.warning_count());

    let shifts = h.store.all_shifts().await;
    let in_first = shifts.iter().filter(|s| s.schedule_version_id == first.id).count();
    let in_second = shifts.iter().filter(|s| s.schedule_version_id == second.id).count();
    assert_eq!(in_first, 499);
    assert_eq!(in_second, 499);

    let calculator = CoverageCalculator::new(h.repos.clone());
    let ca = calculator
        .calculate_coverage_for_schedule(first.id, first.effective_start, first.effective_end, &cancel)
        .await
        .expect("coverage of first");
    let cb = calculator
        .calculate_coverage_for_schedule(second.id, second.effective_start, second.effective_end, &cancel)
        .await
        .expect("coverage of second");
    assert_eq!(ca.coverage_by_position.len(), 499);
    assert_eq!(ca.coverage_by_position, cb.coverage_by_position);
    assert_eq!(ca.summary, cb.summary);
}

#[tokio::test]
async fn cells_expand_over_matching_days() {
    // Mon 3 .. Sun 9 March: five weekdays, two weekend days
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    let bytes = OdsBuilder::new()
        .grid("Mid Weekday Body 5pm - 6pm", &[&["", "Mid Body", "Mid Neuro"], &["CPMC CT Neuro", "", "x"]])
        .grid("ON Weekend Neuro", &[&["", "ON1"], &["SFMC MR", "2"]])
        .build();

    let (batch, result) = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(bytes), &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.row_count, 7);
    assert!(result.is_promotable(), "{}", result.summary());

    let shifts = h.store.all_shifts().await;
    let weekday: Vec<_> = shifts.iter().filter(|s| s.shift_type == "Mid Neuro").collect();
    assert_eq!(weekday.len(), 5);
    assert!(weekday.iter().all(|s| s.specialty_constraint == SpecialtyConstraint::NeuroOnly));
    assert!(weekday.iter().all(|s| s.start_time == NaiveTime::from_hms_opt(17, 0, 0)));
    assert!(weekday.iter().all(|s| s.end_time == NaiveTime::from_hms_opt(18, 0, 0)));
    assert!(weekday.iter().all(|s| s.desired_coverage == 1 && s.is_mandatory));

    let weekend: Vec<_> = shifts.iter().filter(|s| s.shift_type == "ON1").collect();
    assert_eq!(weekend.len(), 2);
    assert!(weekend.iter().all(|s| s.desired_coverage == 2));
    assert!(weekend.iter().all(|s| s.specialty_constraint == SpecialtyConstraint::NeuroOnly));
    assert!(weekend.iter().all(|s| s.site_code == "SFMC" && s.study_type == "MR"));
}

#[tokio::test]
async fn row_without_study_type_warns_once() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    let bytes = OdsBuilder::new()
        .grid("Mid Weekday Body", &[&["", "Mid", "ON"], &["CPMC", "x", "x"], &["CPMC CT", "x", ""]])
        .build();

    let (batch, result) = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(bytes), &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(result.messages_by_code(codes::MISSING_STUDY_TYPE).count(), 1);
    assert_eq!(batch.row_count, 1);
}

#[tokio::test]
async fn sheet_with_no_matching_days_is_skipped() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    let bytes = OdsBuilder::new()
        .grid("ON Weekend Body", &[&["", "ON"], &["CPMC CT", "x"]])
        .build();

    let (batch, result) = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(bytes), &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 0);
    assert_eq!(result.messages_by_code(codes::NO_MATCHING_DATES).count(), 1);
}

#[tokio::test]
async fn unreadable_archive_fails_the_batch() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;

    let (batch, result) = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(b"not a zip".to_vec()), &CancellationToken::new())
        .await
        .expect("a bad file is data, not infrastructure");

    assert_eq!(batch.state, BatchState::Failed);
    assert!(batch.error_message.is_some());
    assert_eq!(result.messages_by_code(codes::INVALID_ARCHIVE).count(), 1);
    assert!(!result.is_importable());
    assert!(h.store.all_shifts().await.is_empty());
}

#[tokio::test]
async fn missing_file_is_an_infrastructure_error() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let err = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, OdsSource::file(dir.path().join("gone.ods")), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Source(ref e) if e.is_infrastructure()));
    let batches = h.store.all_batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].state, BatchState::Failed);
}

#[tokio::test]
async fn rejected_writes_cost_one_warning_each() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    h.store.fail_shift_writes_when(|s| s.study_type == "CT3");

    let (batch, result) = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(large_sheet(&[])), &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 499);
    assert_eq!(result.messages_by_code(codes::SHIFT_PERSIST_FAILED).count(), 1);
}

#[tokio::test]
async fn only_staging_versions_accept_imports() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    h.versions().promote(version.id, h.user).await.expect("promote");

    let err = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(common::single_cell_ods()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::VersionNotStaging { .. }));
    assert!(h.store.all_batches().await.is_empty());
}

#[tokio::test]
async fn other_hospital_is_refused() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;

    let err = OdsImportService::new(h.repos.clone())
        .import(uuid::Uuid::new_v4(), version.id, bytes_source(common::single_cell_ods()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::HospitalMismatch { .. }));
}

#[tokio::test]
async fn cancelled_before_start_writes_nothing() {
    let h = Harness::new();
    let monday = day(2025, 3, 3);
    let version = h.staging(monday, monday).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = OdsImportService::new(h.repos.clone())
        .import(h.hospital, version.id, bytes_source(common::single_cell_ods()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Cancelled));
    assert!(h.store.all_batches().await.is_empty());
    assert!(h.store.all_shifts().await.is_empty());
}

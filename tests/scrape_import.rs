// tests/scrape_import.rs

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Datelike;
use common::{day, Harness};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use schedcu_import::config::PipelineConfig;
use schedcu_import::models::{AssignmentSource, BatchState};
use schedcu_import::scrape::{
    AliasDirectory, RecordSetProvider, ScrapeError, ScrapeProvider, ScrapeRecord, ScrapeWindow,
};
use schedcu_import::services::{ImportError, ScrapeImportService};
use schedcu_import::validation::codes;

fn records(values: Vec<Value>) -> Vec<ScrapeRecord> {
    values
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => m,
            other => panic!("record must be an object: {other}"),
        })
        .collect()
}

fn fast() -> PipelineConfig {
    PipelineConfig {
        scrape_workers: 3,
        scrape_interval: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn service(h: &Harness, provider: impl ScrapeProvider + 'static, people: AliasDirectory, config: &PipelineConfig) -> ScrapeImportService {
    ScrapeImportService::new(h.repos.clone(), Arc::new(provider), Arc::new(people), config)
}

/// Fails windows in `failing_month` (all of them when `None`) and serves
/// `inner` for the rest.
struct FlakyProvider {
    failing_month: Option<u32>,
    inner: RecordSetProvider,
}

#[async_trait]
impl ScrapeProvider for FlakyProvider {
    async fn fetch_window(&self, window: ScrapeWindow) -> Result<Vec<ScrapeRecord>, ScrapeError> {
        if self.failing_month.map_or(true, |m| m == window.start.month()) {
            return Err(ScrapeError::Fetch {
                window,
                reason: "HTTP 503".into(),
            });
        }
        self.inner.fetch_window(window).await
    }
}

/// Records peak concurrency and the windows requested.
#[derive(Default)]
struct CountingProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<ScrapeWindow>>,
}

#[async_trait]
impl ScrapeProvider for CountingProvider {
    async fn fetch_window(&self, window: ScrapeWindow) -> Result<Vec<ScrapeRecord>, ScrapeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.seen.lock().expect("lock").push(window);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn records_resolve_to_assignments() {
    // Given: two ON1 shifts and one scraped record per day
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    let mon = h.shift(&version, day(2025, 3, 3), "ON1", 1).await;
    let tue = h.shift(&version, day(2025, 3, 4), "ON1", 1).await;
    let smith = Uuid::new_v4();
    let mut people = AliasDirectory::new();
    people.insert("Dr Smith", smith);

    let provider = RecordSetProvider::new(records(vec![
        json!({ "person": "dr smith", "shift": "on1", "date": "2025-03-03", "label": "ON1 (CT)" }),
        json!({ "person": "DR SMITH", "shift": "ON1", "date": "03/04/2025" }),
    ]));

    // When
    let (batch, result) = service(&h, provider, people, &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    // Then
    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 2);
    assert!(result.is_promotable(), "{}", result.summary());

    let assignments = h.store.all_assignments().await;
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| a.person_id == smith && a.source == AssignmentSource::ExternalScrape));
    let on_mon = assignments.iter().find(|a| a.shift_instance_id == mon.id).expect("monday");
    assert_eq!(on_mon.original_shift_label, "ON1 (CT)");
    let on_tue = assignments.iter().find(|a| a.shift_instance_id == tue.id).expect("tuesday");
    assert_eq!(on_tue.original_shift_label, "ON1");
}

#[tokio::test]
async fn data_problems_become_warnings() {
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    h.shift(&version, day(2025, 3, 3), "Mid", 1).await;
    let jones = Uuid::new_v4();
    let mut people = AliasDirectory::new();
    people.insert("jones", jones);

    let provider = RecordSetProvider::new(records(vec![
        json!({ "person": "jones", "shift": "Mid", "date": "2025-03-03" }),
        json!({ "person": "jones", "shift": "Mid", "date": "2025-03-03" }),
        json!({ "person": "nobody", "shift": "Mid", "date": "2025-03-03" }),
        json!({ "person": "jones", "shift": "Swing", "date": "2025-03-03" }),
        json!({ "person": "jones", "shift": "Mid", "date": "2025-03-20" }),
        json!({ "person": "jones", "date": "2025-03-03" }),
    ]));

    let (batch, result) = service(&h, provider, people, &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 1);
    assert_eq!(result.messages_by_code(codes::DUPLICATE_ASSIGNMENT).count(), 1);
    assert_eq!(result.messages_by_code(codes::UNKNOWN_PERSON).count(), 1);
    assert_eq!(result.messages_by_code(codes::UNKNOWN_SHIFT_TYPE).count(), 1);
    assert_eq!(result.messages_by_code(codes::DATE_OUTSIDE_WINDOW).count(), 1);
    assert_eq!(result.messages_by_code(codes::MALFORMED_SCRAPE_RECORD).count(), 1);
    assert_eq!(result.warning_count(), 5);
    assert!(result.is_importable());
}

#[tokio::test]
async fn records_from_unrequested_months_are_reported() {
    // Given: a March week and records dated in May, one malformed
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    h.shift(&version, day(2025, 3, 3), "Mid", 1).await;
    let jones = Uuid::new_v4();
    let mut people = AliasDirectory::new();
    people.insert("jones", jones);

    let provider = RecordSetProvider::new(records(vec![
        json!({ "person": "jones", "shift": "Mid", "date": "2025-03-03" }),
        json!({ "person": "jones", "shift": "Mid", "date": "2025-05-01" }),
        json!({ "shift": "Mid", "date": "2025-05-02" }),
    ]));

    // When
    let (batch, result) = service(&h, provider, people, &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    // Then: the May records are surfaced instead of silently dropped
    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 1);
    let outside: Vec<_> = result.messages_by_code(codes::DATE_OUTSIDE_WINDOW).collect();
    assert_eq!(outside.len(), 1);
    assert!(outside[0].text.contains("2025-05-01"));
    let malformed: Vec<_> = result.messages_by_code(codes::MALFORMED_SCRAPE_RECORD).collect();
    assert_eq!(malformed.len(), 1);
    assert_eq!(
        malformed[0].context.as_ref().and_then(|c| c["window"].as_str()),
        Some("outside requested windows")
    );
    assert_eq!(result.warning_count(), 2);
}

#[tokio::test]
async fn study_narrows_matching_shifts() {
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 3)).await;
    let ct = h.shift(&version, day(2025, 3, 3), "ON1", 1).await;
    let mut mr = ct.clone();
    mr.id = Uuid::new_v4();
    mr.study_type = "MR".into();
    h.repos.shifts.create(&mr).await.expect("store MR shift");

    let person = Uuid::new_v4();
    let with_study = RecordSetProvider::new(records(vec![
        json!({ "person": person.to_string(), "shift": "ON1", "date": "2025-03-03", "study": "mr" }),
    ]));
    let (batch, _) = service(&h, with_study, AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");
    assert_eq!(batch.row_count, 1);
    assert_eq!(h.store.all_assignments().await[0].shift_instance_id, mr.id);

    // Without a study the record lands on every shift of that type
    let other = Uuid::new_v4();
    let without_study = RecordSetProvider::new(records(vec![
        json!({ "person": other.to_string(), "shift": "ON1", "date": "2025-03-03" }),
    ]));
    let (batch, _) = service(&h, without_study, AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");
    assert_eq!(batch.row_count, 2);
}

#[tokio::test]
async fn failed_window_is_an_error_but_others_still_import() {
    // Feb 20 .. Mar 10 is two month windows; March fails
    let h = Harness::new();
    let version = h.staging(day(2025, 2, 20), day(2025, 3, 10)).await;
    h.shift(&version, day(2025, 2, 21), "ON1", 1).await;
    let provider = FlakyProvider {
        failing_month: Some(3),
        inner: RecordSetProvider::new(records(vec![
            json!({ "person": Uuid::new_v4().to_string(), "shift": "ON1", "date": "2025-02-21" }),
        ])),
    };

    let (batch, result) = service(&h, provider, AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Complete);
    assert_eq!(batch.row_count, 1);
    let failures: Vec<_> = result.messages_by_code(codes::SCRAPE_WINDOW_FAILED).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].text.contains("2025-03-01..2025-03-10"));
    assert!(!result.is_importable());
}

#[tokio::test]
async fn every_window_failing_fails_the_batch() {
    let h = Harness::new();
    let version = h.staging(day(2025, 2, 20), day(2025, 3, 10)).await;
    let provider = FlakyProvider {
        failing_month: None,
        inner: RecordSetProvider::new(Vec::new()),
    };

    let (batch, result) = service(&h, provider, AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Failed);
    assert_eq!(result.messages_by_code(codes::SCRAPE_WINDOW_FAILED).count(), 2);
    assert_eq!(result.messages_by_code(codes::NO_RECORDS_IMPORTED).count(), 1);
}

#[tokio::test]
async fn fan_out_respects_worker_bound() {
    let h = Harness::new();
    let version = h.staging(day(2025, 1, 1), day(2025, 12, 31)).await;
    let provider = Arc::new(CountingProvider::default());
    let service = ScrapeImportService::new(
        h.repos.clone(),
        provider.clone(),
        Arc::new(AliasDirectory::new()),
        &fast(),
    );

    let (batch, _) = service
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    assert_eq!(batch.state, BatchState::Complete);
    assert!(provider.peak.load(Ordering::SeqCst) <= 3);
    let seen = provider.seen.lock().expect("lock").clone();
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn requests_are_spaced_by_the_interval() {
    let h = Harness::new();
    // Three month windows
    let version = h.staging(day(2025, 1, 15), day(2025, 3, 15)).await;
    let config = PipelineConfig {
        scrape_workers: 3,
        scrape_interval: Duration::from_millis(60),
        ..PipelineConfig::default()
    };

    let started = Instant::now();
    service(&h, RecordSetProvider::new(Vec::new()), AliasDirectory::new(), &config)
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    assert!(started.elapsed() >= Duration::from_millis(110), "{:?}", started.elapsed());
}

#[tokio::test]
async fn shifts_are_read_once_per_import() {
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    for d in 3..=9 {
        h.shift(&version, day(2025, 3, d), "ON1", 1).await;
    }
    let person = Uuid::new_v4().to_string();
    let provider = RecordSetProvider::new(records(
        (3..=9)
            .map(|d| json!({ "person": person, "shift": "ON1", "date": format!("2025-03-0{d}") }))
            .collect(),
    ));
    h.store.reset_query_log();

    service(&h, provider, AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &CancellationToken::new())
        .await
        .expect("import runs");

    let reads = h
        .store
        .queries()
        .into_iter()
        .filter(|q| q.starts_with("shift_instances."))
        .count();
    assert_eq!(reads, 1);
}

#[tokio::test]
async fn cancellation_during_fetch_fails_the_batch() {
    let h = Harness::new();
    let version = h.staging(day(2025, 3, 3), day(2025, 3, 9)).await;
    let cancel = CancellationToken::new();

    struct CancellingProvider(CancellationToken);

    #[async_trait]
    impl ScrapeProvider for CancellingProvider {
        async fn fetch_window(&self, _window: ScrapeWindow) -> Result<Vec<ScrapeRecord>, ScrapeError> {
            self.0.cancel();
            Ok(Vec::new())
        }
    }

    let err = service(&h, CancellingProvider(cancel.clone()), AliasDirectory::new(), &fast())
        .import(h.hospital, version.id, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Cancelled));
    let batches = h.store.all_batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].state, BatchState::Failed);
}

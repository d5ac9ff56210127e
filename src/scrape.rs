// src/scrape.rs

//! Boundary with the external scheduling site. Fetching and page parsing
//! live outside this crate; records arrive here as loose key/value maps.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::PersonId;

/// One scraped row. Required keys: `person`, `shift`, `date`.
/// Optional: `label` (shift text as displayed), `study`.
pub type ScrapeRecord = Map<String, Value>;

pub(crate) fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

pub(crate) fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y"))
        .map_err(|e| format!("invalid date '{}': {}", s, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScrapeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ScrapeWindow {
    /// Splits `[start, end]` on calendar-month boundaries.
    pub fn months(start: NaiveDate, end: NaiveDate) -> Vec<ScrapeWindow> {
        let mut out = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            let month_start = cursor.with_day(1).unwrap_or(cursor);
            let month_end = month_start
                .checked_add_months(Months::new(1))
                .and_then(|d| d.pred_opt())
                .unwrap_or(end);
            let window_end = month_end.min(end);
            out.push(ScrapeWindow { start: cursor, end: window_end });
            match window_end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for ScrapeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetching {window} failed: {reason}")]
    Fetch { window: ScrapeWindow, reason: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    async fn fetch_window(&self, window: ScrapeWindow) -> Result<Vec<ScrapeRecord>, ScrapeError>;

    /// Records the provider holds that no requested window would return.
    /// Sources that only answer per window have none.
    fn leftovers(&self, _requested: &[ScrapeWindow]) -> Vec<ScrapeRecord> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated record
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedAssignment {
    pub person: String,
    pub shift: String,
    pub date: NaiveDate,
    pub label: String,
    pub study: Option<String>,
}

fn text_field(record: &ScrapeRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ScrapedAssignment {
    pub fn from_record(record: &ScrapeRecord) -> Result<Self, String> {
        let person = text_field(record, "person").ok_or("missing 'person'")?;
        let shift = text_field(record, "shift").ok_or("missing 'shift'")?;
        let raw_date = text_field(record, "date").ok_or("missing 'date'")?;
        let date = parse_day(&raw_date)?;
        let label = text_field(record, "label").unwrap_or_else(|| shift.clone());
        let study = text_field(record, "study");
        Ok(Self { person, shift, date, label, study })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record-set provider (records already fetched by the external transport)
// ─────────────────────────────────────────────────────────────────────────────

/// Serves pre-fetched records the way the site serves month pages: a window
/// gets every record dated in its calendar month. Records with no usable
/// date go out once, with whichever window is asked for first. Records
/// dated in a month nobody asked for come back through `leftovers`.
pub struct RecordSetProvider {
    records: Vec<ScrapeRecord>,
    undated_sent: AtomicBool,
}

impl RecordSetProvider {
    pub fn new(records: Vec<ScrapeRecord>) -> Self {
        Self { records, undated_sent: AtomicBool::new(false) }
    }

    /// Reads a JSON array of objects.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScrapeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<ScrapeRecord> = serde_json::from_str(&raw).map_err(|source| ScrapeError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(records))
    }

    fn record_month(record: &ScrapeRecord) -> Option<(i32, u32)> {
        let raw = text_field(record, "date")?;
        let d = parse_day(&raw).ok()?;
        Some((d.year(), d.month()))
    }
}

#[async_trait]
impl ScrapeProvider for RecordSetProvider {
    async fn fetch_window(&self, window: ScrapeWindow) -> Result<Vec<ScrapeRecord>, ScrapeError> {
        let month = (window.start.year(), window.start.month());
        let take_undated = !self.undated_sent.swap(true, Ordering::SeqCst);
        Ok(self
            .records
            .iter()
            .filter(|r| match Self::record_month(r) {
                Some(m) => m == month,
                None => take_undated,
            })
            .cloned()
            .collect())
    }

    fn leftovers(&self, requested: &[ScrapeWindow]) -> Vec<ScrapeRecord> {
        self.records
            .iter()
            .filter(|r| {
                Self::record_month(r).is_some_and(|m| {
                    !requested.iter().any(|w| (w.start.year(), w.start.month()) == m)
                })
            })
            .cloned()
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Person directory
// ─────────────────────────────────────────────────────────────────────────────

pub trait PersonDirectory: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<PersonId>;
}

/// Alias -> person id, matched case- and space-insensitively. A reference
/// that is already a UUID resolves to itself.
#[derive(Debug, Clone, Default)]
pub struct AliasDirectory {
    by_alias: HashMap<String, PersonId>,
}

impl AliasDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: &str, person: PersonId) -> &mut Self {
        self.by_alias.insert(norm(alias), person);
        self
    }

    /// Reads a JSON object of `{ "alias": "uuid", ... }`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScrapeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: HashMap<String, PersonId> = serde_json::from_str(&raw).map_err(|source| ScrapeError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let mut dir = Self::new();
        for (alias, person) in entries {
            dir.insert(&alias, person);
        }
        Ok(dir)
    }
}

impl PersonDirectory for AliasDirectory {
    fn resolve(&self, reference: &str) -> Option<PersonId> {
        if let Ok(id) = Uuid::from_str(reference.trim()) {
            return Some(id);
        }
        self.by_alias.get(&norm(reference)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    fn record(v: Value) -> ScrapeRecord {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn windows_split_on_month_boundaries() {
        let w = ScrapeWindow::months(d(2025, 1, 15), d(2025, 3, 10));
        assert_eq!(
            w,
            vec![
                ScrapeWindow { start: d(2025, 1, 15), end: d(2025, 1, 31) },
                ScrapeWindow { start: d(2025, 2, 1), end: d(2025, 2, 28) },
                ScrapeWindow { start: d(2025, 3, 1), end: d(2025, 3, 10) },
            ]
        );
        assert_eq!(ScrapeWindow::months(d(2025, 3, 5), d(2025, 3, 5)).len(), 1);
        assert!(ScrapeWindow::months(d(2025, 3, 6), d(2025, 3, 5)).is_empty());
    }

    #[test]
    fn record_validation_names_the_missing_key() {
        let ok = record(json!({"person": "Dr. Lee", "shift": "ON1", "date": "2025-03-04", "study": "CT"}));
        let a = ScrapedAssignment::from_record(&ok).expect("valid");
        assert_eq!(a.label, "ON1");
        assert_eq!(a.study.as_deref(), Some("CT"));

        let missing = record(json!({"person": "Dr. Lee", "date": "2025-03-04"}));
        assert_eq!(ScrapedAssignment::from_record(&missing), Err("missing 'shift'".to_string()));

        let bad_date = record(json!({"person": "Dr. Lee", "shift": "ON1", "date": "March 4"}));
        assert!(ScrapedAssignment::from_record(&bad_date).is_err());
    }

    #[tokio::test]
    async fn record_set_serves_month_pages() {
        let provider = RecordSetProvider::new(vec![
            record(json!({"person": "a", "shift": "ON1", "date": "2025-03-02"})),
            record(json!({"person": "b", "shift": "ON1", "date": "2025-04-02"})),
            record(json!({"person": "c", "shift": "ON1"})),
        ]);
        let march = provider
            .fetch_window(ScrapeWindow { start: d(2025, 3, 10), end: d(2025, 3, 31) })
            .await
            .expect("fetch");
        assert_eq!(march.len(), 2);
        let april = provider
            .fetch_window(ScrapeWindow { start: d(2025, 4, 1), end: d(2025, 4, 30) })
            .await
            .expect("fetch");
        assert_eq!(april.len(), 1);
    }

    #[test]
    fn directory_resolves_aliases_and_raw_ids() {
        let lee = Uuid::new_v4();
        let mut dir = AliasDirectory::new();
        dir.insert("Dr. Lee", lee).insert("LEE", lee);
        assert_eq!(dir.resolve("  dr. lee "), Some(lee));
        assert_eq!(dir.resolve("lee"), Some(lee));
        let raw = Uuid::new_v4();
        assert_eq!(dir.resolve(&raw.to_string()), Some(raw));
        assert_eq!(dir.resolve("nobody"), None);
    }
}

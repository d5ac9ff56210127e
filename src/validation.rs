// src/validation.rs

//! Error-collecting validation used by every pipeline stage.
//!
//! Nothing here fails. Stages push messages and keep going so a single run
//! reports every defect in a spreadsheet or scrape, and the orchestrator
//! decides afterwards what is fatal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Stable message codes
// ─────────────────────────────────────────────────────────────────────────────
pub mod codes {
    pub const FILE_READ_ERROR: &str = "FILE_READ_ERROR";
    pub const INVALID_ARCHIVE: &str = "INVALID_ARCHIVE";
    pub const MISSING_CONTENT_XML: &str = "MISSING_CONTENT_XML";
    pub const XML_DECODE_ERROR: &str = "XML_DECODE_ERROR";
    pub const NO_VALID_SHEETS: &str = "NO_VALID_SHEETS";
    pub const INVALID_SHEET_NAME: &str = "INVALID_SHEET_NAME";
    pub const NO_HEADER_ROW: &str = "NO_HEADER_ROW";
    pub const EMPTY_COVERAGE_GRID: &str = "EMPTY_COVERAGE_GRID";
    pub const AMBIGUOUS_TIME_RANGE: &str = "AMBIGUOUS_TIME_RANGE";
    pub const UNPARSED_TIME_RANGE: &str = "UNPARSED_TIME_RANGE";
    pub const ODS_PARSED: &str = "ODS_PARSED";

    pub const INVALID_COVERAGE_MARKER: &str = "INVALID_COVERAGE_MARKER";
    pub const MISSING_STUDY_TYPE: &str = "MISSING_STUDY_TYPE";
    pub const NO_MATCHING_DATES: &str = "NO_MATCHING_DATES";
    pub const SHIFT_PERSIST_FAILED: &str = "SHIFT_PERSIST_FAILED";
    pub const NO_RECORDS_IMPORTED: &str = "NO_RECORDS_IMPORTED";

    pub const SCRAPE_WINDOW_FAILED: &str = "SCRAPE_WINDOW_FAILED";
    pub const MALFORMED_SCRAPE_RECORD: &str = "MALFORMED_SCRAPE_RECORD";
    pub const UNKNOWN_PERSON: &str = "UNKNOWN_PERSON";
    pub const UNKNOWN_SHIFT_TYPE: &str = "UNKNOWN_SHIFT_TYPE";
    pub const DATE_OUTSIDE_WINDOW: &str = "DATE_OUTSIDE_WINDOW";
    pub const DUPLICATE_ASSIGNMENT: &str = "DUPLICATE_ASSIGNMENT";
    pub const ASSIGNMENT_PERSIST_FAILED: &str = "ASSIGNMENT_PERSIST_FAILED";

    pub const COVERAGE_COMPLETE: &str = "COVERAGE_COMPLETE";
    pub const COVERAGE_CALCULATION_FAILED: &str = "COVERAGE_CALCULATION_FAILED";
    pub const COVERAGE_GAP: &str = "COVERAGE_GAP";
    pub const COVERAGE_NO_REQUIREMENT: &str = "COVERAGE_NO_REQUIREMENT";
    pub const COVERAGE_IMPROVED: &str = "COVERAGE_IMPROVED";
    pub const COVERAGE_DEGRADED: &str = "COVERAGE_DEGRADED";
    pub const COVERAGE_UNCHANGED: &str = "COVERAGE_UNCHANGED";
    pub const COVERAGE_PERSIST_FAILED: &str = "COVERAGE_PERSIST_FAILED";

    pub const VERSION_CREATE_FAILED: &str = "VERSION_CREATE_FAILED";
    pub const ODS_IMPORT_FAILED: &str = "ODS_IMPORT_FAILED";
    pub const ODS_IMPORT_FATAL: &str = "ODS_IMPORT_FATAL";
    pub const SCRAPE_IMPORT_FAILED: &str = "SCRAPE_IMPORT_FAILED";
    pub const SCRAPE_IMPORT_INCOMPLETE: &str = "SCRAPE_IMPORT_INCOMPLETE";
    pub const SCRAPE_SKIPPED: &str = "SCRAPE_SKIPPED";
    pub const SUMMARY_ATTACH_FAILED: &str = "SUMMARY_ATTACH_FAILED";
    pub const WORKFLOW_CANCELLED: &str = "WORKFLOW_CANCELLED";
    pub const WORKFLOW_COMPLETE: &str = "WORKFLOW_COMPLETE";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Blocks import and promotion.
    Error,
    /// Importable, but must be reviewed before promotion.
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub severity: Severity,
    pub code: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    messages: Vec<ValidationMessage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, Value>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        severity: Severity,
        code: impl Into<String>,
        text: impl Into<String>,
        context: Option<Value>,
    ) -> &mut Self {
        self.messages.push(ValidationMessage {
            severity,
            code: code.into(),
            text: text.into(),
            context,
        });
        self
    }

    pub fn add_error(&mut self, code: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.add(Severity::Error, code, text, None)
    }

    pub fn add_error_with_context(
        &mut self,
        code: impl Into<String>,
        text: impl Into<String>,
        context: Value,
    ) -> &mut Self {
        self.add(Severity::Error, code, text, Some(context))
    }

    pub fn add_warning(&mut self, code: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.add(Severity::Warning, code, text, None)
    }

    pub fn add_warning_with_context(
        &mut self,
        code: impl Into<String>,
        text: impl Into<String>,
        context: Value,
    ) -> &mut Self {
        self.add(Severity::Warning, code, text, Some(context))
    }

    pub fn add_info(&mut self, code: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.add(Severity::Info, code, text, None)
    }

    pub fn add_info_with_context(
        &mut self,
        code: impl Into<String>,
        text: impl Into<String>,
        context: Value,
    ) -> &mut Self {
        self.add(Severity::Info, code, text, Some(context))
    }

    /// Run-level metadata (file name, batch id), independent of any message.
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn messages(&self) -> &[ValidationMessage] {
        &self.messages
    }

    /// Absorbs another result's messages (appended in order) and context.
    pub fn merge(&mut self, other: ValidationResult) -> &mut Self {
        self.messages.extend(other.messages);
        self.context.extend(other.context);
        self
    }

    fn count(&self, severity: Severity) -> usize {
        self.messages.iter().filter(|m| m.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn info_count(&self) -> usize {
        self.count(Severity::Info)
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Warning)
    }

    pub fn is_importable(&self) -> bool {
        !self.has_errors()
    }

    pub fn is_promotable(&self) -> bool {
        !self.has_errors() && !self.has_warnings()
    }

    pub fn messages_by_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ValidationMessage> + 'a {
        self.messages.iter().filter(move |m| m.code == code)
    }

    pub fn messages_by_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationMessage> + '_ {
        self.messages.iter().filter(move |m| m.severity == severity)
    }

    /// Human-readable defect report.
    pub fn summary(&self) -> String {
        if self.messages.is_empty() {
            return "Validation passed: no messages".to_string();
        }

        let mut out = format!(
            "Validation result: {} errors, {} warnings, {} info messages",
            self.error_count(),
            self.warning_count(),
            self.info_count()
        );
        for (severity, heading) in [(Severity::Error, "Errors"), (Severity::Warning, "Warnings")] {
            if self.count(severity) == 0 {
                continue;
            }
            out.push_str(&format!("\n\n{heading}:"));
            for m in self.messages_by_severity(severity) {
                out.push_str(&format!("\n  - {}: {}", m.code, m.text));
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// A sink that can be cloned into concurrent workers.
    pub fn shared() -> SharedValidation {
        SharedValidation::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrent sink
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only handle shared by fan-out workers. The lock is held only for
/// the push itself; reads happen after the workers are done, via `drain_into`.
#[derive(Debug, Clone, Default)]
pub struct SharedValidation {
    inner: Arc<Mutex<Vec<ValidationMessage>>>,
}

impl SharedValidation {
    pub fn add(&self, severity: Severity, code: &str, text: impl Into<String>, context: Option<Value>) {
        let msg = ValidationMessage {
            severity,
            code: code.to_string(),
            text: text.into(),
            context,
        };
        // A poisoned lock still holds every message pushed so far.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(msg);
    }

    pub fn add_error(&self, code: &str, text: impl Into<String>, context: Option<Value>) {
        self.add(Severity::Error, code, text, context);
    }

    pub fn add_warning(&self, code: &str, text: impl Into<String>, context: Option<Value>) {
        self.add(Severity::Warning, code, text, context);
    }

    pub fn add_info(&self, code: &str, text: impl Into<String>, context: Option<Value>) {
        self.add(Severity::Info, code, text, context);
    }

    /// Moves everything collected so far into `result`.
    pub fn drain_into(&self, result: &mut ValidationResult) {
        let drained: Vec<ValidationMessage> = {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        result.messages.extend(drained);
    }
}

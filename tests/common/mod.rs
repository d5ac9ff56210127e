// tests/common/mod.rs

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use schedcu_import::models::{ScheduleVersion, ShiftInstance};
use schedcu_import::repository::{MemoryStore, Repositories};
use schedcu_import::services::ScheduleVersionService;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Builds a minimal ODS archive: a stored `mimetype` member plus
/// `content.xml` holding one `table:table` per sheet.
#[derive(Default)]
pub struct OdsBuilder {
    tables: Vec<String>,
    skip_content: bool,
}

impl OdsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: &str, rows: &[Vec<String>]) -> Self {
        let mut xml = format!(r#"<table:table table:name="{}">"#, escape(name));
        for row in rows {
            xml.push_str("<table:table-row>");
            for cell in row {
                if cell.is_empty() {
                    xml.push_str("<table:table-cell/>");
                } else {
                    xml.push_str(&format!(
                        r#"<table:table-cell office:value-type="string"><text:p>{}</text:p></table:table-cell>"#,
                        escape(cell)
                    ));
                }
            }
            xml.push_str("</table:table-row>");
        }
        xml.push_str("</table:table>");
        self.tables.push(xml);
        self
    }

    /// Convenience over `sheet` for literal grids.
    pub fn grid(self, name: &str, grid: &[&[&str]]) -> Self {
        let rows: Vec<Vec<String>> = grid
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        self.sheet(name, &rows)
    }

    pub fn without_content(mut self) -> Self {
        self.skip_content = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("mimetype", stored).expect("mimetype entry");
        zip.write_all(b"application/vnd.oasis.opendocument.spreadsheet")
            .expect("write mimetype");

        if !self.skip_content {
            let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file("content.xml", opts).expect("content entry");
            let body = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0"><office:body><office:spreadsheet>{}</office:spreadsheet></office:body></office:document-content>"#,
                self.tables.concat()
            );
            zip.write_all(body.as_bytes()).expect("write content");
        }
        zip.finish().expect("finish archive").into_inner()
    }
}

/// The smallest usable spreadsheet: one weekday sheet, one marker.
pub fn single_cell_ods() -> Vec<u8> {
    OdsBuilder::new()
        .grid(
            "Mid Weekday Body 5pm - 6pm",
            &[&["", "Mid Body", "Mid Neuro"], &["CPMC CT Neuro", "", "x"]],
        )
        .build()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub hospital: Uuid,
    pub user: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let repos = store.repositories();
        Self {
            store,
            repos,
            hospital: Uuid::new_v4(),
            user: Uuid::new_v4(),
        }
    }

    pub fn versions(&self) -> ScheduleVersionService {
        ScheduleVersionService::new(self.repos.clone())
    }

    pub async fn staging(&self, start: NaiveDate, end: NaiveDate) -> ScheduleVersion {
        self.versions()
            .create_version(self.hospital, start, end, self.user)
            .await
            .expect("create staging version")
    }

    /// Writes a shift directly, bypassing the spreadsheet import.
    pub async fn shift(&self, version: &ScheduleVersion, date: NaiveDate, shift_type: &str, desired: i32) -> ShiftInstance {
        let shift = ShiftInstance {
            id: Uuid::new_v4(),
            schedule_version_id: version.id,
            hospital_id: version.hospital_id,
            site_code: "CPMC".into(),
            shift_type: shift_type.into(),
            schedule_date: date,
            start_time: None,
            end_time: None,
            study_type: "CT".into(),
            specialty_constraint: schedcu_import::models::SpecialtyConstraint::Both,
            desired_coverage: desired,
            is_mandatory: true,
            created_at: chrono::Utc::now(),
            created_by: self.user,
            deleted_at: None,
            deleted_by: None,
        };
        self.repos.shifts.create(&shift).await.expect("store shift");
        shift
    }
}

// src/ods/reader.rs

//! Streaming walk over `content.xml`, producing one literal grid per table.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::grid::SheetRow;

const TABLE_NS: &[u8] = b"urn:oasis:names:tc:opendocument:xmlns:table:1.0";
const TEXT_NS: &[u8] = b"urn:oasis:names:tc:opendocument:xmlns:text:1.0";
const OFFICE_NS: &[u8] = b"urn:oasis:names:tc:opendocument:xmlns:office:1.0";

/// Upper bound on how many times one repeated row (or `text:s` space) is
/// materialized. Sheets routinely pad to the 1M-row edge with a single
/// repeated element; real data never comes close.
pub const MAX_REPEAT: usize = 1024;

/// Widest row kept. Cells past this edge are dropped; cells before it keep
/// their true column however many blanks precede them.
pub const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
    pub rows: Vec<SheetRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Table,
    Row,
    Cell,
    Paragraph,
    Space,
    Tab,
    LineBreak,
    Annotation,
    Other,
}

fn classify(ns: &ResolveResult, local: &[u8]) -> Tag {
    let ResolveResult::Bound(Namespace(ns)) = ns else {
        return Tag::Other;
    };
    match (*ns, local) {
        (TABLE_NS, b"table") => Tag::Table,
        (TABLE_NS, b"table-row") => Tag::Row,
        (TABLE_NS, b"table-cell") | (TABLE_NS, b"covered-table-cell") => Tag::Cell,
        (TEXT_NS, b"p") | (TEXT_NS, b"h") => Tag::Paragraph,
        (TEXT_NS, b"s") => Tag::Space,
        (TEXT_NS, b"tab") => Tag::Tab,
        (TEXT_NS, b"line-break") => Tag::LineBreak,
        (OFFICE_NS, b"annotation") => Tag::Annotation,
        _ => Tag::Other,
    }
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == local {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn repeat_attr(e: &BytesStart<'_>, local: &[u8]) -> Result<usize, quick_xml::Error> {
    Ok(attr(e, local)?
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1))
}

#[derive(Default)]
struct RowState {
    repeat: usize,
    cells: Vec<String>,
    /// Blank cells seen but not yet materialized; dropped if nothing follows.
    pending_blanks: usize,
}

impl RowState {
    fn push_cell(&mut self, value: String, repeat: usize) {
        if value.trim().is_empty() {
            self.pending_blanks = self.pending_blanks.saturating_add(repeat);
            return;
        }
        let start = self.cells.len().saturating_add(self.pending_blanks);
        self.pending_blanks = 0;
        if start >= MAX_COLUMNS {
            return;
        }
        self.cells.resize(start, String::new());
        let room = MAX_COLUMNS - start;
        self.cells.extend(std::iter::repeat(value).take(repeat.min(room)));
    }
}

struct CellState {
    repeat: usize,
    text: String,
    paragraphs: usize,
    in_paragraph: usize,
}

#[derive(Default)]
struct Walker {
    tables: Vec<RawTable>,
    current: Option<RawTable>,
    /// Nesting of `table:table`; only depth 1 contributes cells.
    table_depth: usize,
    annotation_depth: usize,
    next_row: u64,
    row: Option<RowState>,
    cell: Option<CellState>,
}

impl Walker {
    fn collecting(&self) -> bool {
        self.table_depth == 1 && self.annotation_depth == 0
    }

    fn open(&mut self, tag: Tag, e: &BytesStart<'_>, empty: bool) -> Result<(), quick_xml::Error> {
        match tag {
            Tag::Table => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    let name = attr(e, b"name")?.unwrap_or_default();
                    self.current = Some(RawTable { name, rows: Vec::new() });
                    self.next_row = 1;
                }
                if empty {
                    self.close(Tag::Table);
                }
            }
            Tag::Annotation => {
                if !empty {
                    self.annotation_depth += 1;
                }
            }
            _ if !self.collecting() => {}
            Tag::Row => {
                let repeat = repeat_attr(e, b"number-rows-repeated")?;
                self.row = Some(RowState { repeat, ..Default::default() });
                if empty {
                    self.close(Tag::Row);
                }
            }
            Tag::Cell => {
                let repeat = repeat_attr(e, b"number-columns-repeated")?;
                self.cell = Some(CellState {
                    repeat,
                    text: String::new(),
                    paragraphs: 0,
                    in_paragraph: 0,
                });
                if empty {
                    self.close(Tag::Cell);
                }
            }
            Tag::Paragraph => {
                if let Some(cell) = self.cell.as_mut() {
                    if cell.paragraphs > 0 {
                        cell.text.push('\n');
                    }
                    cell.paragraphs += 1;
                    if !empty {
                        cell.in_paragraph += 1;
                    }
                }
            }
            Tag::Space => {
                let count = repeat_attr(e, b"c")?.min(MAX_REPEAT);
                if let Some(cell) = self.cell.as_mut() {
                    cell.text.extend(std::iter::repeat(' ').take(count));
                }
            }
            Tag::Tab => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.text.push('\t');
                }
            }
            Tag::LineBreak => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.text.push('\n');
                }
            }
            Tag::Other => {}
        }
        Ok(())
    }

    fn close(&mut self, tag: Tag) {
        match tag {
            Tag::Table => {
                if self.table_depth == 1 {
                    if let Some(table) = self.current.take() {
                        self.tables.push(table);
                    }
                    self.row = None;
                    self.cell = None;
                }
                self.table_depth = self.table_depth.saturating_sub(1);
            }
            Tag::Annotation => {
                self.annotation_depth = self.annotation_depth.saturating_sub(1);
            }
            _ if !self.collecting() => {}
            Tag::Cell => {
                if let (Some(cell), Some(row)) = (self.cell.take(), self.row.as_mut()) {
                    row.push_cell(cell.text, cell.repeat);
                }
            }
            Tag::Paragraph => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.in_paragraph = cell.in_paragraph.saturating_sub(1);
                }
            }
            Tag::Row => {
                let Some(row) = self.row.take() else {
                    return;
                };
                let first = self.next_row;
                let advance = u64::try_from(row.repeat).unwrap_or(u64::MAX);
                self.next_row = self.next_row.saturating_add(advance);
                if row.cells.is_empty() {
                    return;
                }
                if let Some(table) = self.current.as_mut() {
                    for i in 0..row.repeat.min(MAX_REPEAT) as u64 {
                        let Ok(number) = u32::try_from(first.saturating_add(i)) else {
                            break;
                        };
                        table.rows.push(SheetRow::new(number, row.cells.clone()));
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, s: &str) {
        if !self.collecting() {
            return;
        }
        if let Some(cell) = self.cell.as_mut() {
            if cell.in_paragraph > 0 {
                cell.text.push_str(s);
            }
        }
    }
}

/// Reads every top-level table in document order. Fully blank rows are
/// skipped but still advance the row counter.
pub fn read_tables<R: BufRead>(source: R) -> Result<Vec<RawTable>, quick_xml::Error> {
    let mut reader = NsReader::from_reader(source);
    reader.config_mut().trim_text(false);

    let mut walker = Walker::default();
    let mut buf = Vec::new();
    loop {
        let (ns, event) = reader.read_resolved_event_into(&mut buf)?;
        match event {
            Event::Start(e) => {
                let tag = classify(&ns, e.local_name().as_ref());
                walker.open(tag, &e, false)?;
            }
            Event::Empty(e) => {
                let tag = classify(&ns, e.local_name().as_ref());
                walker.open(tag, &e, true)?;
            }
            Event::End(e) => {
                let tag = classify(&ns, e.local_name().as_ref());
                walker.close(tag);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                walker.text(&text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                walker.text(&text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(walker.tables)
}

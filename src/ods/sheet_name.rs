// src/ods/sheet_name.rs

//! Tab-name grammar: `<Mid|ON> <Weekday|Weekend> <Body|Neuro> [<time range>]`.

use std::fmt;

use chrono::NaiveTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShiftCategory {
    Mid,
    On,
}

impl fmt::Display for ShiftCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShiftCategory::Mid => "MID",
            ShiftCategory::On => "ON",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn matches(&self, date: chrono::NaiveDate) -> bool {
        use chrono::{Datelike, Weekday};
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            DayType::Weekday => !weekend,
            DayType::Weekend => weekend,
        }
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DayType::Weekday => "WEEKDAY",
            DayType::Weekend => "WEEKEND",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpecialtyScenario {
    Body,
    Neuro,
}

impl fmt::Display for SpecialtyScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecialtyScenario::Body => "BODY",
            SpecialtyScenario::Neuro => "NEURO",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// No am/pm anywhere in the range; hours were read on a 24-hour clock.
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParsedSheetName {
    pub category: ShiftCategory,
    pub day_type: DayType,
    pub scenario: SpecialtyScenario,
    pub time_range: Option<TimeRange>,
    /// Text followed the scenario but did not read as a time range.
    pub unparsed_time: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

/// One side of a range before meridiem inheritance.
#[derive(Debug, Clone, Copy)]
struct ClockPart {
    hour: u32,
    minute: u32,
    meridiem: Option<Meridiem>,
}

pub struct SheetNameParser;

impl SheetNameParser {
    /// Returns `None` when category, day type or scenario is off-grammar,
    /// including the empty string. The time range is best-effort: an
    /// unreadable suffix leaves `time_range` unset and sets `unparsed_time`.
    pub fn parse(name: &str) -> Option<ParsedSheetName> {
        let mut tokens = name.split_whitespace();

        let category = match tokens.next()?.to_lowercase().as_str() {
            "mid" => ShiftCategory::Mid,
            "on" => ShiftCategory::On,
            _ => return None,
        };
        let day_type = match tokens.next()?.to_lowercase().as_str() {
            "weekday" => DayType::Weekday,
            "weekend" => DayType::Weekend,
            _ => return None,
        };
        let scenario = match tokens.next()?.to_lowercase().as_str() {
            "body" => SpecialtyScenario::Body,
            "neuro" => SpecialtyScenario::Neuro,
            _ => return None,
        };

        let rest = tokens.collect::<Vec<_>>().join(" ");
        let time_range = if rest.is_empty() { None } else { parse_time_range(&rest) };

        Some(ParsedSheetName {
            category,
            day_type,
            scenario,
            time_range,
            unparsed_time: !rest.is_empty() && time_range.is_none(),
        })
    }
}

fn parse_time_range(raw: &str) -> Option<TimeRange> {
    let normalized = raw.to_lowercase().replace(['\u{2013}', '\u{2014}'], "-");
    let (left, right) = normalized.split_once('-')?;
    let start = parse_clock(left)?;
    let end = parse_clock(right)?;

    // "5 - 6 pm": the start borrows the trailing meridiem.
    let (start_m, end_m) = match (start.meridiem, end.meridiem) {
        (Some(s), Some(e)) => (Some(s), Some(e)),
        (None, Some(e)) => (Some(e), Some(e)),
        (Some(s), None) => (Some(s), Some(s)),
        (None, None) => (None, None),
    };

    Some(TimeRange {
        start: to_time(start, start_m)?,
        end: to_time(end, end_m)?,
        ambiguous: start_m.is_none(),
    })
}

fn parse_clock(raw: &str) -> Option<ClockPart> {
    let s = raw.trim();
    let (digits, meridiem) = if let Some(d) = s.strip_suffix("am") {
        (d.trim_end(), Some(Meridiem::Am))
    } else if let Some(d) = s.strip_suffix("pm") {
        (d.trim_end(), Some(Meridiem::Pm))
    } else {
        (s, None)
    };

    let (h, m) = match digits.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (digits, None),
    };
    if h.is_empty() || h.len() > 2 || !h.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = match m {
        Some(m) if m.len() == 2 && m.bytes().all(|b| b.is_ascii_digit()) => m.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };

    Some(ClockPart { hour, minute, meridiem })
}

fn to_time(part: ClockPart, meridiem: Option<Meridiem>) -> Option<NaiveTime> {
    let hour = match meridiem {
        Some(_) if part.hour == 0 || part.hour > 12 => return None,
        Some(Meridiem::Am) => part.hour % 12,
        Some(Meridiem::Pm) => part.hour % 12 + 12,
        None => part.hour,
    };
    NaiveTime::from_hms_opt(hour, part.minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn hours(p: &ParsedSheetName) -> (u32, u32) {
        let r = p.time_range.expect("time range");
        (r.start.hour(), r.end.hour())
    }

    #[test]
    fn abbreviated_range_inherits_trailing_meridiem() {
        let p = SheetNameParser::parse("Mid Weekday Body 5 - 6 pm").expect("parses");
        assert_eq!(p.category, ShiftCategory::Mid);
        assert_eq!(p.day_type, DayType::Weekday);
        assert_eq!(p.scenario, SpecialtyScenario::Body);
        assert_eq!(hours(&p), (17, 18));
        assert!(!p.time_range.expect("range").ambiguous);
        assert_eq!(p.category.to_string(), "MID");
    }

    #[test]
    fn overnight_and_minutes() {
        let p = SheetNameParser::parse("ON Weekend Neuro 10pm \u{2013} 7am").expect("parses");
        assert_eq!(hours(&p), (22, 7));

        let p = SheetNameParser::parse("mid weekday neuro 11:30am-12:15pm").expect("parses");
        let r = p.time_range.expect("range");
        assert_eq!((r.start.hour(), r.start.minute()), (11, 30));
        assert_eq!((r.end.hour(), r.end.minute()), (12, 15));
    }

    #[test]
    fn twelve_am_is_midnight() {
        let p = SheetNameParser::parse("ON Weekday Body 12am - 8am").expect("parses");
        assert_eq!(hours(&p), (0, 8));
    }

    #[test]
    fn range_without_meridiem_is_flagged() {
        let p = SheetNameParser::parse("Mid Weekend Body 13 - 17").expect("parses");
        let r = p.time_range.expect("range");
        assert!(r.ambiguous);
        assert_eq!((r.start.hour(), r.end.hour()), (13, 17));
    }

    #[test]
    fn time_range_is_optional() {
        let p = SheetNameParser::parse("ON Weekend Neuro").expect("parses");
        assert!(p.time_range.is_none());
    }

    #[test]
    fn off_grammar_names_are_rejected() {
        for name in [
            "",
            "   ",
            "Sheet1",
            "Mid Weekday",
            "Day Weekday Body",
            "Mid Holiday Body",
            "Mid Weekday Cardiac",
            "Body Weekday Mid",
        ] {
            assert_eq!(SheetNameParser::parse(name), None, "{name:?}");
        }
    }

    #[test]
    fn unreadable_time_keeps_the_sheet() {
        for name in [
            "Mid Weekday Body soon",
            "Mid Weekday Body 5 pm",
            "Mid Weekday Body 13 - 6 pm",
            "Mid Weekday Body 5:7 - 6 pm",
        ] {
            let p = SheetNameParser::parse(name).expect("category, day and scenario parse");
            assert_eq!(p.category, ShiftCategory::Mid, "{name:?}");
            assert_eq!(p.scenario, SpecialtyScenario::Body, "{name:?}");
            assert!(p.time_range.is_none(), "{name:?}");
            assert!(p.unparsed_time, "{name:?}");
        }
        assert!(!SheetNameParser::parse("ON Weekend Neuro").expect("parses").unparsed_time);
    }

    #[test]
    fn day_type_matches_calendar() {
        let sat = chrono::NaiveDate::from_ymd_opt(2025, 3, 1).expect("date");
        let mon = chrono::NaiveDate::from_ymd_opt(2025, 3, 3).expect("date");
        assert!(DayType::Weekend.matches(sat));
        assert!(!DayType::Weekday.matches(sat));
        assert!(DayType::Weekday.matches(mon));
    }
}

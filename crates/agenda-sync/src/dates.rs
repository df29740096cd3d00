//! Start/end reconciliation over the raw record's candidate date fields.

use agenda_core::{present, NormalizedDateRange, RawEventRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%Y%m%d"];

/// Best-effort instant parser. Values without an offset are read as UTC;
/// bare dates resolve to midnight UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let value = value.trim_end_matches('Z');
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// First candidate that parses; unparseable candidates count as absent.
fn first_instant<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<DateTime<Utc>> {
    candidates
        .into_iter()
        .flatten()
        .find_map(parse_instant)
}

pub fn start_candidates(record: &RawEventRecord) -> [Option<&str>; 5] {
    [
        present(record.date_start.as_deref()),
        present(record.event_date.as_deref()),
        record.raw_field("date_start"),
        record.raw_field("firstdate_begin"),
        record.raw_field("event_date"),
    ]
}

pub fn end_candidates(record: &RawEventRecord) -> [Option<&str>; 3] {
    [
        present(record.date_end.as_deref()),
        record.raw_field("date_end"),
        record.raw_field("firstdate_end"),
    ]
}

/// Applies the interval invariants: a lone start closes on itself and a
/// reversed pair is swapped.
pub fn reconcile(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match (start, end) {
        (Some(start), None) => (Some(start), Some(start)),
        (Some(start), Some(end)) if end < start => (Some(end), Some(start)),
        other => other,
    }
}

pub fn normalize_dates(record: &RawEventRecord) -> NormalizedDateRange {
    let (start, end) = reconcile(
        first_instant(start_candidates(record)),
        first_instant(end_candidates(record)),
    );
    NormalizedDateRange {
        start,
        end,
        raw_text: present(record.date_text.as_deref()).map(str::to_string),
    }
}

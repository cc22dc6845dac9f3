//! Calendar-field derivation for raw records
//!
//! [`enrich`] is a pure function of the record timestamp: it never reads the
//! wall clock, the locale or the local timezone. Timestamps carrying an offset
//! are read in that offset, so `2024-03-31T02:15:00+02:00` has hour 2.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};

use crate::error::MalformedTimestampError;
use crate::types::{CalendarFields, EnrichedRecord, RawRecord};

/// Offset-less forms, tried in order after RFC 3339
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Derive the calendar fields of a record
///
/// The normalized `datetime` keeps the offset when one was given
/// (`2024-02-01T10:15:00+00:00`) and is `YYYY-MM-DDTHH:MM:SS` otherwise.
pub fn enrich(record: RawRecord) -> Result<EnrichedRecord, MalformedTimestampError> {
    let Some((local, datetime)) = parse_timestamp(record.timestamp.trim()) else {
        return Err(MalformedTimestampError {
            source_type: record.source,
            timestamp: record.timestamp,
        });
    };

    Ok(EnrichedRecord {
        calendar: calendar_fields(&local),
        datetime,
        record,
    })
}

/// Calendar fields of a wall-clock time
pub fn calendar_fields(local: &NaiveDateTime) -> CalendarFields {
    CalendarFields {
        year: local.year(),
        month: local.month(),
        day: local.day(),
        week: local.iso_week().week(),
        hour: local.hour(),
        minute: local.minute(),
    }
}

/// Wall-clock time as written, plus its normalized text
fn parse_timestamp(text: &str) -> Option<(NaiveDateTime, String)> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        let local = parsed.naive_local();
        return Some((local, parsed.format("%Y-%m-%dT%H:%M:%S%:z").to_string()));
    }

    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|local| (local, local.format("%Y-%m-%dT%H:%M:%S").to_string()))
    })
}

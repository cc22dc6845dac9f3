//! Core types for energy-ingest

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ArchiveGranularity;

/// The three upstream datasets handled by the pipeline
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Elia solar forecast and measurement data (15-minute resolution)
    Solar,
    /// Elia wind forecast and measurement data (15-minute resolution)
    Wind,
    /// Belpex day-ahead spot prices (hourly resolution)
    Price,
}

impl SourceType {
    /// Every source type, in processing order
    pub const ALL: [SourceType; 3] = [SourceType::Solar, SourceType::Wind, SourceType::Price];

    /// Short lowercase name used in logs and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Solar => "solar",
            SourceType::Wind => "wind",
            SourceType::Price => "price",
        }
    }

    /// Directory name under the data and archive roots
    pub fn dir_name(&self) -> &'static str {
        match self {
            SourceType::Solar => "SolarForecast",
            SourceType::Wind => "WindForecast",
            SourceType::Price => "Belpex",
        }
    }

    /// Prefix of every raw file name
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SourceType::Solar => "SolarForecast_Elia",
            SourceType::Wind => "WindForecast_Elia",
            SourceType::Price => "Belpex",
        }
    }

    /// Extension of raw files (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            SourceType::Solar | SourceType::Wind => "json",
            SourceType::Price => "csv",
        }
    }

    /// All fetch periods of a calendar year, in chronological order
    ///
    /// Solar and wind are fetched per day, prices per month.
    pub fn fetch_periods(&self, year: i32) -> Vec<FetchPeriod> {
        match self {
            SourceType::Solar | SourceType::Wind => {
                let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
                    return Vec::new();
                };
                first
                    .iter_days()
                    .take_while(|d| d.year() == year)
                    .map(FetchPeriod::Day)
                    .collect()
            }
            SourceType::Price => (1..=12)
                .map(|month| FetchPeriod::Month { year, month })
                .collect(),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solar" => Ok(SourceType::Solar),
            "wind" => Ok(SourceType::Wind),
            "price" | "belpex" => Ok(SourceType::Price),
            other => Err(format!(
                "unknown source type '{other}' (expected solar, wind or price)"
            )),
        }
    }
}

/// Granularity at which one request is made against a source
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchPeriod {
    /// A single calendar day (solar, wind)
    Day(NaiveDate),
    /// A calendar month (prices)
    Month {
        /// Calendar year
        year: i32,
        /// Month number, 1-12
        month: u32,
    },
}

impl FetchPeriod {
    /// Calendar year of the period
    pub fn year(&self) -> i32 {
        match self {
            FetchPeriod::Day(date) => date.year(),
            FetchPeriod::Month { year, .. } => *year,
        }
    }

    /// Month number of the period
    pub fn month(&self) -> u32 {
        match self {
            FetchPeriod::Day(date) => date.month(),
            FetchPeriod::Month { month, .. } => *month,
        }
    }

    /// First calendar day covered by the period
    pub fn first_day(&self) -> Option<NaiveDate> {
        match self {
            FetchPeriod::Day(date) => Some(*date),
            FetchPeriod::Month { year, month } => NaiveDate::from_ymd_opt(*year, *month, 1),
        }
    }

    /// The archive period this fetch period is stored under
    pub fn archive_period(
        &self,
        source: SourceType,
        granularity: ArchiveGranularity,
    ) -> ArchivePeriod {
        ArchivePeriod {
            source,
            year: self.year(),
            month: match granularity {
                ArchiveGranularity::Year => None,
                ArchiveGranularity::Month => Some(self.month()),
            },
        }
    }

    /// Deterministic raw file name, e.g. `SolarForecast_Elia_20240201.json`
    pub fn raw_file_name(&self, source: SourceType) -> String {
        match self {
            FetchPeriod::Day(date) => format!(
                "{}_{}.{}",
                source.file_prefix(),
                date.format("%Y%m%d"),
                source.extension()
            ),
            FetchPeriod::Month { year, month } => format!(
                "{}_{}{:02}.{}",
                source.file_prefix(),
                year,
                month,
                source.extension()
            ),
        }
    }

    /// Parse a raw file name back into its fetch period
    pub fn from_raw_file_name(source: SourceType, name: &str) -> Option<Self> {
        let stem = name
            .strip_prefix(source.file_prefix())?
            .strip_prefix('_')?
            .strip_suffix(source.extension())?
            .strip_suffix('.')?;
        match source {
            SourceType::Solar | SourceType::Wind => NaiveDate::parse_from_str(stem, "%Y%m%d")
                .ok()
                .map(FetchPeriod::Day),
            SourceType::Price => {
                if stem.len() != 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let year = stem[..4].parse().ok()?;
                let month = stem[4..].parse().ok()?;
                (1..=12)
                    .contains(&month)
                    .then_some(FetchPeriod::Month { year, month })
            }
        }
    }
}

impl fmt::Display for FetchPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPeriod::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            FetchPeriod::Month { year, month } => write!(f, "{year}-{month:02}"),
        }
    }
}

/// Unit of archive compaction: one source type over a year or a month
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchivePeriod {
    /// Source the raw files belong to
    pub source: SourceType,
    /// Calendar year
    pub year: i32,
    /// Month number when archiving monthly, `None` for yearly bundles
    pub month: Option<u32>,
}

impl ArchivePeriod {
    /// Yearly archive period
    pub fn year(source: SourceType, year: i32) -> Self {
        Self {
            source,
            year,
            month: None,
        }
    }

    /// Monthly archive period
    pub fn month(source: SourceType, year: i32, month: u32) -> Self {
        Self {
            source,
            year,
            month: Some(month),
        }
    }

    /// File name of the bundle, e.g. `SolarForecast_2024.zip`
    pub fn bundle_name(&self) -> String {
        match self.month {
            Some(month) => format!("{}_{}{:02}.zip", self.source.dir_name(), self.year, month),
            None => format!("{}_{}.zip", self.source.dir_name(), self.year),
        }
    }

    /// Whether a fetch period falls inside this archive period
    pub fn contains(&self, period: &FetchPeriod) -> bool {
        period.year() == self.year && self.month.is_none_or(|m| m == period.month())
    }
}

impl fmt::Display for ArchivePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{} {}-{:02}", self.source, self.year, month),
            None => write!(f, "{} {}", self.source, self.year),
        }
    }
}

/// One observation as delivered by a source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source the record came from
    pub source: SourceType,
    /// Timestamp text exactly as delivered
    pub timestamp: String,
    /// Measurement (MW) or price (EUR/MWh), when present and numeric
    pub value: Option<f64>,
    /// Remaining source-specific fields, passed through unmodified
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Calendar fields derived from a record timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarFields {
    /// Calendar year
    pub year: i32,
    /// Month, 1-12
    pub month: u32,
    /// Day of month, 1-31
    pub day: u32,
    /// ISO-8601 week number
    pub week: u32,
    /// Hour, 0-23
    pub hour: u32,
    /// Minute, 0-59
    pub minute: u32,
}

/// A raw record together with its derived calendar fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The record as fetched
    pub record: RawRecord,
    /// Normalized timestamp text stored in the `datetime` column
    pub datetime: String,
    /// Derived calendar fields
    pub calendar: CalendarFields,
}

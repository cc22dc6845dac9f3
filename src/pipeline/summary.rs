//! Outcome of a pipeline run

use chrono::NaiveDate;
use std::fmt;

use crate::archive::CompactionOutcome;
use crate::db::{BatchResult, SkipReason};
use crate::error::MalformedTimestampError;
use crate::types::{ArchivePeriod, FetchPeriod, SourceType};

/// A fetch period (or stored payload) that could not be ingested
#[derive(Clone, Debug)]
pub struct FailedPeriod {
    /// Source of the period
    pub source: SourceType,
    /// The period
    pub period: FetchPeriod,
    /// What went wrong
    pub cause: String,
}

/// A record the database refused
#[derive(Clone, Debug)]
pub struct RejectedRecord {
    /// Source of the record
    pub source: SourceType,
    /// Normalized timestamp of the record
    pub datetime: String,
    /// Storage engine message
    pub reason: String,
}

/// An archive operation that failed; raw files were left in place
#[derive(Clone, Debug)]
pub struct ArchiveFailure {
    /// Archive period concerned
    pub period: ArchivePeriod,
    /// What went wrong
    pub cause: String,
}

/// Everything a run did, returned by the orchestrator entry points
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Date the run treated as today
    pub reference_date: NaiveDate,
    /// Fetch periods processed successfully
    pub succeeded: Vec<(SourceType, FetchPeriod)>,
    /// Of those, how many were replayed from disk instead of fetched
    pub replayed: usize,
    /// Periods that failed, with cause
    pub failed: Vec<FailedPeriod>,
    /// Rows written to the database
    pub inserted: usize,
    /// Records skipped because their key was already stored
    pub duplicates: usize,
    /// Records the database refused, with cause
    pub rejected: Vec<RejectedRecord>,
    /// Records left out because their timestamp could not be parsed
    pub malformed: Vec<MalformedTimestampError>,
    /// Archive periods that were compacted or merged
    pub archived: Vec<(ArchivePeriod, CompactionOutcome)>,
    /// Archive operations that failed
    pub archive_failures: Vec<ArchiveFailure>,
}

impl RunSummary {
    /// Empty summary for a run on `reference_date`
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            succeeded: Vec::new(),
            replayed: 0,
            failed: Vec::new(),
            inserted: 0,
            duplicates: 0,
            rejected: Vec::new(),
            malformed: Vec::new(),
            archived: Vec::new(),
            archive_failures: Vec::new(),
        }
    }

    /// Whether any period or archive operation failed
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.archive_failures.is_empty()
    }

    /// Total records that were not written
    pub fn skipped(&self) -> usize {
        self.duplicates + self.rejected.len() + self.malformed.len()
    }

    /// Fold a batch insert outcome into the counters
    pub fn record_batch(&mut self, source: SourceType, result: BatchResult) {
        self.inserted += result.inserted;
        for skipped in result.skipped {
            match skipped.reason {
                SkipReason::DuplicateKey => self.duplicates += 1,
                SkipReason::Rejected(reason) => self.rejected.push(RejectedRecord {
                    source,
                    datetime: skipped.record.datetime,
                    reason,
                }),
            }
        }
    }

    /// Record a failed period
    pub fn record_failure(&mut self, source: SourceType, period: FetchPeriod, cause: impl ToString) {
        self.failed.push(FailedPeriod {
            source,
            period,
            cause: cause.to_string(),
        });
    }

    /// Record an archive failure
    pub fn record_archive_failure(&mut self, period: ArchivePeriod, cause: impl ToString) {
        self.archive_failures.push(ArchiveFailure {
            period,
            cause: cause.to_string(),
        });
    }

    /// Append another run's results, e.g. `persist` after `fetch_and_archive`
    pub fn merge(&mut self, other: RunSummary) {
        self.succeeded.extend(other.succeeded);
        self.replayed += other.replayed;
        self.failed.extend(other.failed);
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected.extend(other.rejected);
        self.malformed.extend(other.malformed);
        self.archived.extend(other.archived);
        self.archive_failures.extend(other.archive_failures);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary (reference date {})", self.reference_date)?;
        writeln!(
            f,
            "  periods: {} succeeded ({} replayed), {} failed",
            self.succeeded.len(),
            self.replayed,
            self.failed.len()
        )?;
        writeln!(
            f,
            "  records: {} inserted, {} duplicates, {} rejected, {} malformed",
            self.inserted,
            self.duplicates,
            self.rejected.len(),
            self.malformed.len()
        )?;
        writeln!(
            f,
            "  archive: {} compacted, {} failed",
            self.archived.len(),
            self.archive_failures.len()
        )?;

        for failed in &self.failed {
            writeln!(f, "  FAILED {} {}: {}", failed.source, failed.period, failed.cause)?;
        }
        for rejected in &self.rejected {
            writeln!(
                f,
                "  REJECTED {} {}: {}",
                rejected.source, rejected.datetime, rejected.reason
            )?;
        }
        for malformed in &self.malformed {
            writeln!(f, "  MALFORMED {}", malformed)?;
        }
        for (period, outcome) in &self.archived {
            writeln!(f, "  ARCHIVED {}: {:?}", period, outcome)?;
        }
        for failure in &self.archive_failures {
            writeln!(f, "  ARCHIVE FAILED {}: {}", failure.period, failure.cause)?;
        }
        Ok(())
    }
}

//! Database layer for energy-ingest
//!
//! Handles SQLite persistence of the enriched solar, wind and price records.
//!
//! ## Submodules
//!
//! - [`schema`] - Table descriptions the DDL and INSERT statements are derived from
//! - `migrations` - Database lifecycle, schema migrations
//! - `batch` - Batch inserts that skip duplicate keys

use crate::types::EnrichedRecord;
use sqlx::sqlite::SqlitePool;

mod batch;
mod migrations;
pub mod schema;

pub use schema::{TableSchema, PRICE, SOLAR, WIND};

/// Why a record was not inserted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// A row with the same unique key already exists (or came earlier in the batch)
    DuplicateKey,
    /// The database refused the row, e.g. a NOT NULL column without a value
    Rejected(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DuplicateKey => write!(f, "duplicate key"),
            SkipReason::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

/// A record left out of a batch, with the reason
#[derive(Clone, Debug)]
pub struct SkippedRecord {
    /// The record as it was submitted
    pub record: EnrichedRecord,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Outcome of [`Database::insert_batch`]
///
/// `inserted + skipped.len()` always equals the number of submitted records.
#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    /// Number of rows written
    pub inserted: usize,
    /// Records that were not written, in submission order
    pub skipped: Vec<SkippedRecord>,
}

impl BatchResult {
    /// Number of records submitted
    pub fn total(&self) -> usize {
        self.inserted + self.skipped.len()
    }

    /// Fold another batch's outcome into this one
    pub fn merge(&mut self, other: BatchResult) {
        self.inserted += other.inserted;
        self.skipped.extend(other.skipped);
    }
}

/// Database handle for energy-ingest
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

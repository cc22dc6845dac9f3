//! # energy-ingest
//!
//! Resilient ingestion of Belgian grid data: Elia solar and wind
//! measurements/forecasts and Belpex day-ahead prices, fetched period by
//! period, kept as raw files that are bundled per closed period, and
//! persisted into SQLite.
//!
//! ## Design Philosophy
//!
//! - **Failures stay local** - A failing period is reported, the run continues
//! - **Idempotent** - Re-running never duplicates rows or loses archived data
//! - **Raw data first** - Payloads are stored verbatim before they are parsed
//!
//! ## Quick Start
//!
//! ```no_run
//! use energy_ingest::{Config, Orchestrator, SourceType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::from_config(Config::default()).await?;
//!
//!     let summary = orchestrator.run(2023, 2024, &SourceType::ALL).await?;
//!     println!("{}", summary);
//!
//!     orchestrator.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Raw file storage and period bundles
pub mod archive;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Calendar enrichment of raw records
pub mod enrich;
/// Error types
pub mod error;
/// Upstream data sources
pub mod fetch;
/// Per-run log file
pub mod logging;
/// Run orchestration
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveManager, ArchiveState, CompactionOutcome, MaterializedPeriod};
pub use config::{ArchiveGranularity, Config, RetryConfig};
pub use db::{BatchResult, Database, SkipReason, SkippedRecord, TableSchema};
pub use enrich::enrich;
pub use error::{
    ArchiveError, DatabaseError, Error, FetchError, FetchErrorKind, MalformedTimestampError,
    Result, RetryError, SourceError,
};
pub use fetch::{Fetcher, HttpRecordSource, RawBatch, RecordSource};
pub use logging::{RunLog, RunLogGuard};
pub use pipeline::{Orchestrator, RunSummary};
pub use types::{
    ArchivePeriod, CalendarFields, EnrichedRecord, FetchPeriod, RawRecord, SourceType,
};

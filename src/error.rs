//! Error types for energy-ingest
//!
//! Every component classifies its own failures:
//! - [`SourceError`] for a single request against a data source
//! - [`RetryError`] for the outcome of a retried operation
//! - [`FetchError`] for a fetch period that could not be acquired
//! - [`MalformedTimestampError`] for a record the enricher cannot place in time
//! - [`ArchiveError`] for compaction and materialization problems
//! - [`DatabaseError`] for the storage layer
//!
//! The orchestrator converts all of them into entries of a run summary; only
//! setup failures surface as [`Error`].

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ArchivePeriod, FetchPeriod, SourceType};

/// Result type alias for energy-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for energy-ingest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Archive operation failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Fetching a period failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A whole-batch insert was rejected; triggers the per-record fallback
    #[error("batch insert into {table} failed: {reason}")]
    BatchInsert {
        /// Target table
        table: &'static str,
        /// Storage engine message
        reason: String,
    },
}

/// Failure of a single request against a data source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Connection could not be established or was dropped
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The payload could not be decoded
    #[error("invalid payload: {0}")]
    Decode(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed
    ///
    /// Connection failures, timeouts, HTTP 5xx and 429 are transient; every
    /// other status and undecodable payloads are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Connect(_) | SourceError::Timeout(_) => true,
            SourceError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            SourceError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            SourceError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status {
                status: status.as_u16(),
                url,
            }
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            // connect, body and request errors all happen before a usable response
            SourceError::Connect(e.to_string())
        }
    }
}

/// Outcome of an operation that could not be completed by [`crate::retry::with_retry`]
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation failed with an error classified as permanent
    #[error("permanent failure: {0}")]
    Permanent(#[source] E),

    /// Every attempt failed with a transient error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        last: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The underlying error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Why a fetch period failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Not worth retrying (bad request shape, unusable payload)
    Permanent,
    /// Transient failures persisted through every retry
    Exhausted,
}

/// A fetch period that could not be acquired
#[derive(Debug, Clone, Error)]
#[error("fetching {source_type} {period} failed ({kind:?} after {attempts} attempt(s)): {cause}")]
pub struct FetchError {
    /// Classification of the failure
    pub kind: FetchErrorKind,
    /// Source that was queried
    pub source_type: SourceType,
    /// Period that was requested
    pub period: FetchPeriod,
    /// Number of attempts made
    pub attempts: u32,
    /// Error of the last attempt
    #[source]
    pub cause: SourceError,
}

/// A record timestamp that none of the accepted formats could parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {source_type} timestamp '{timestamp}'")]
pub struct MalformedTimestampError {
    /// Source of the offending record
    pub source_type: SourceType,
    /// The timestamp text as delivered
    pub timestamp: String,
}

/// Archive compaction and materialization errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The freshly written bundle does not match the raw files; raw files were kept
    #[error("integrity check failed for {period} ({bundle}): {reason}")]
    Integrity {
        /// Period being compacted
        period: ArchivePeriod,
        /// Bundle that failed verification
        bundle: PathBuf,
        /// What did not match
        reason: String,
    },

    /// An existing bundle could not be read
    #[error("unreadable bundle {bundle}: {reason}")]
    Corrupt {
        /// Bundle path
        bundle: PathBuf,
        /// Underlying zip error
        reason: String,
    },

    /// Filesystem operation failed
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

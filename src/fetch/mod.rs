//! Acquisition of raw data from the upstream sources
//!
//! A [`RecordSource`] answers one request per (source type, fetch period)
//! with the raw payload bytes. The [`Fetcher`] wraps it in the retry policy,
//! decodes the payload and classifies what went wrong.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{FetchError, FetchErrorKind, Result, RetryError, SourceError};
use crate::retry::retry_retryable;
use crate::types::{FetchPeriod, RawRecord, SourceType};

mod elia;
mod parse;
mod price;

pub use elia::EliaClient;
pub use parse::{parse_payload, parse_price};
pub use price::{CsvExportClient, NoPriceExport, PriceExport, export_window};

/// Something that returns raw payload bytes for a fetch period
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Raw payload for one fetch period; an empty payload means "no data yet"
    async fn fetch_payload(
        &self,
        source: SourceType,
        period: FetchPeriod,
    ) -> std::result::Result<Vec<u8>, SourceError>;
}

/// The production source: Elia for solar and wind, a [`PriceExport`] for prices
pub struct HttpRecordSource {
    elia: EliaClient,
    prices: Arc<dyn PriceExport>,
}

impl HttpRecordSource {
    /// Combine an Elia client with a price export
    pub fn new(elia: EliaClient, prices: Arc<dyn PriceExport>) -> Self {
        Self { elia, prices }
    }

    /// Build both clients from the fetch settings
    ///
    /// Without a `price_export_url` every price period fails permanently.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let elia = EliaClient::new(config)?;
        let prices: Arc<dyn PriceExport> = match &config.price_export_url {
            Some(template) => Arc::new(CsvExportClient::new(template.clone(), config)?),
            None => Arc::new(NoPriceExport),
        };
        Ok(Self::new(elia, prices))
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_payload(
        &self,
        source: SourceType,
        period: FetchPeriod,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        match (source, period) {
            (SourceType::Solar | SourceType::Wind, FetchPeriod::Day(date)) => {
                self.elia.fetch_day(source, date).await
            }
            (SourceType::Price, FetchPeriod::Month { year, month }) => {
                self.prices.export_month(year, month).await
            }
            _ => Err(SourceError::Decode(format!(
                "{} is not fetched per {}",
                source, period
            ))),
        }
    }
}

/// Raw payload of one fetch period together with its decoded records
#[derive(Clone, Debug)]
pub struct RawBatch {
    /// Source the payload came from
    pub source: SourceType,
    /// Period that was requested
    pub period: FetchPeriod,
    /// Bytes exactly as delivered (stored verbatim by the archive)
    pub payload: Vec<u8>,
    /// Decoded records
    pub records: Vec<RawRecord>,
}

impl RawBatch {
    /// Decode a payload, e.g. one replayed from the archive
    pub fn from_payload(
        source: SourceType,
        period: FetchPeriod,
        payload: Vec<u8>,
    ) -> std::result::Result<Self, SourceError> {
        let records = parse_payload(source, &payload)?;
        Ok(Self {
            source,
            period,
            payload,
            records,
        })
    }

    /// Whether the source had nothing for this period
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Retrying, classifying front of a [`RecordSource`]
///
/// Has no storage side effect; storing the payload is left to the archive.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn RecordSource>,
    retry: RetryConfig,
}

impl Fetcher {
    /// Create a fetcher over a record source
    pub fn new(source: Arc<dyn RecordSource>, retry: RetryConfig) -> Self {
        Self { source, retry }
    }

    /// Fetch and decode one period
    ///
    /// Transient failures are retried per the retry config. A permanent
    /// failure (or an undecodable payload) returns
    /// [`FetchErrorKind::Permanent`] at once; running out of attempts returns
    /// [`FetchErrorKind::Exhausted`].
    pub async fn fetch(
        &self,
        source_type: SourceType,
        period: FetchPeriod,
    ) -> std::result::Result<RawBatch, FetchError> {
        let mut attempts = 0u32;
        let result = retry_retryable(&self.retry, || {
            attempts += 1;
            self.attempt(source_type, period)
        })
        .await;

        match result {
            Ok(batch) => {
                debug!(
                    source = %source_type,
                    period = %period,
                    records = batch.records.len(),
                    bytes = batch.payload.len(),
                    "Fetched period"
                );
                Ok(batch)
            }
            Err(RetryError::Permanent(cause)) => Err(FetchError {
                kind: FetchErrorKind::Permanent,
                source_type,
                period,
                attempts,
                cause,
            }),
            Err(RetryError::Exhausted { attempts, last }) => Err(FetchError {
                kind: FetchErrorKind::Exhausted,
                source_type,
                period,
                attempts,
                cause: last,
            }),
        }
    }

    async fn attempt(
        &self,
        source_type: SourceType,
        period: FetchPeriod,
    ) -> std::result::Result<RawBatch, SourceError> {
        let payload = self.source.fetch_payload(source_type, period).await?;
        RawBatch::from_payload(source_type, period, payload)
    }
}

#[cfg(test)]
mod tests;

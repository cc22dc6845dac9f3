//! Common test utilities for energy-ingest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use energy_ingest::{
    Config, FetchPeriod, Orchestrator, RecordSource, RetryConfig, SourceError, SourceType,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// In-memory record source answering from canned payloads
///
/// Periods without a payload answer with an empty payload ("no data yet").
#[derive(Default)]
pub struct StubSource {
    payloads: HashMap<(SourceType, FetchPeriod), Vec<u8>>,
    failing: HashSet<(SourceType, FetchPeriod)>,
    calls: Mutex<Vec<(SourceType, FetchPeriod)>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, source: SourceType, period: FetchPeriod, payload: Vec<u8>) -> Self {
        self.payloads.insert((source, period), payload);
        self
    }

    /// Answer every request for `period` with HTTP 503
    pub fn failing(mut self, source: SourceType, period: FetchPeriod) -> Self {
        self.failing.insert((source, period));
        self
    }

    /// Requests made for periods that have a payload
    pub fn calls_with_data(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|key| self.payloads.contains_key(*key))
            .count()
    }

    /// Requests made for one period
    pub fn calls_for(&self, source: SourceType, period: FetchPeriod) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|key| **key == (source, period))
            .count()
    }
}

#[async_trait]
impl RecordSource for StubSource {
    async fn fetch_payload(
        &self,
        source: SourceType,
        period: FetchPeriod,
    ) -> Result<Vec<u8>, SourceError> {
        self.calls.lock().unwrap().push((source, period));
        if self.failing.contains(&(source, period)) {
            return Err(SourceError::Status {
                status: 503,
                url: format!("stub://{}/{}", source, period),
            });
        }
        Ok(self
            .payloads
            .get(&(source, period))
            .cloned()
            .unwrap_or_default())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> FetchPeriod {
    FetchPeriod::Day(date(y, m, d))
}

/// One solar record at noon of `period`, as the Elia API would deliver it
pub fn solar_day_payload(period: &FetchPeriod) -> Vec<u8> {
    format!(
        r#"[{{"datetime": "{}T12:00:00+00:00", "resolutioncode": "PT15M", "region": "Belgium", "measured": 1234.5, "monitoredcapacity": 9876.0}}]"#,
        period
    )
    .into_bytes()
}

/// Stub with one solar record for each of February 1-28, 2024
pub fn february_solar() -> StubSource {
    (1..=28).fold(StubSource::new(), |stub, d| {
        let period = day(2024, 2, d);
        stub.with_payload(SourceType::Solar, period, solar_day_payload(&period))
    })
}

/// Configuration rooted in a temporary directory, retrying without delay
pub fn test_config(base: &TempDir) -> Config {
    let mut config = Config::with_base_dir(base.path());
    config.retry = RetryConfig::immediate(2);
    config
}

pub async fn orchestrator(config: Config, source: Arc<StubSource>, today: NaiveDate) -> Orchestrator {
    Orchestrator::new(config, source)
        .await
        .unwrap()
        .with_reference_date(today)
}

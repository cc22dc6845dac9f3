//! Orchestration of fetch, archive, enrichment and persistence
//!
//! The [`Orchestrator`] walks the requested years and sources one fetch
//! period at a time. A failing period is recorded in the [`RunSummary`] and
//! the run moves on; only setup problems are returned as errors.

use chrono::{Datelike, Local, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveManager, CompactionOutcome};
use crate::config::Config;
use crate::db::{Database, TableSchema};
use crate::enrich::enrich;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, HttpRecordSource, RawBatch, RecordSource, parse_payload};
use crate::logging::RunLog;
use crate::types::{ArchivePeriod, EnrichedRecord, FetchPeriod, RawRecord, SourceType};

mod summary;

pub use summary::{ArchiveFailure, FailedPeriod, RejectedRecord, RunSummary};

/// Drives the pipeline for a configured set of directories and database
pub struct Orchestrator {
    config: Config,
    db: Database,
    fetcher: Fetcher,
    archive: ArchiveManager,
    reference_date: Option<NaiveDate>,
    log: Option<RunLog>,
}

impl Orchestrator {
    /// Create an orchestrator over a record source
    ///
    /// Validates the configuration and opens (and migrates) the database.
    pub async fn new(config: Config, source: Arc<dyn RecordSource>) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.persistence.database_path).await?;
        let fetcher = Fetcher::new(source, config.retry.clone());
        let archive = ArchiveManager::new(&config.paths, config.archive.granularity);

        Ok(Self {
            config,
            db,
            fetcher,
            archive,
            reference_date: None,
            log: None,
        })
    }

    /// Create an orchestrator over the HTTP sources named in the configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        let source = HttpRecordSource::from_config(&config.fetch)?;
        Self::new(config, Arc::new(source)).await
    }

    /// Use a fixed date as "today" instead of the local clock
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Write run banners and summaries to a run log
    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    /// The database records are persisted to
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The archive raw files and bundles are kept in
    pub fn archive(&self) -> &ArchiveManager {
        &self.archive
    }

    /// Fetch, archive and persist every available period of `from_year..=to_year`
    ///
    /// Periods already stored on disk are replayed instead of fetched. After
    /// the last fetch period of an archive period, that archive period is
    /// compacted if it has closed.
    pub async fn run(
        &self,
        from_year: i32,
        to_year: i32,
        sources: &[SourceType],
    ) -> Result<RunSummary> {
        self.ingest("run", from_year, to_year, sources, true).await
    }

    /// Like [`Self::run`], without writing to the database
    pub async fn fetch_and_archive(
        &self,
        from_year: i32,
        to_year: i32,
        sources: &[SourceType],
    ) -> Result<RunSummary> {
        self.ingest("update", from_year, to_year, sources, false)
            .await
    }

    /// Replay every archived or raw period on disk into the database
    ///
    /// Records are inserted in batches of `persistence.batch_size`.
    pub async fn persist(&self, sources: &[SourceType]) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.today());
        self.banner("persist started");

        for &source in sources {
            let periods = self.archive.periods(source)?;
            for period in periods {
                self.persist_archive_period(&period, &mut summary).await;
            }
        }

        self.finish("persist", &summary);
        Ok(summary)
    }

    /// Close the database
    pub async fn close(self) {
        self.db.close().await;
    }

    /// Last month whose data the sources have published, as (year, month)
    pub fn latest_available_month(&self, reference_date: NaiveDate) -> (i32, u32) {
        latest_available_month(reference_date, self.config.publication_lag_days)
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    async fn ingest(
        &self,
        name: &str,
        from_year: i32,
        to_year: i32,
        sources: &[SourceType],
        persist: bool,
    ) -> Result<RunSummary> {
        if from_year > to_year {
            return Err(Error::Config {
                message: format!("from_year {} is after to_year {}", from_year, to_year),
                key: Some("from_year".to_string()),
            });
        }

        let reference = self.today();
        let latest = self.latest_available_month(reference);
        let mut summary = RunSummary::new(reference);

        self.banner(&format!("{} started", name));
        info!(
            from_year,
            to_year,
            reference = %reference,
            latest_year = latest.0,
            latest_month = latest.1,
            "Starting {}",
            name
        );

        for year in from_year..=to_year {
            for &source in sources {
                let periods: Vec<FetchPeriod> = source
                    .fetch_periods(year)
                    .into_iter()
                    .filter(|p| (p.year(), p.month()) <= latest)
                    .collect();

                let mut current: Option<ArchivePeriod> = None;
                for period in periods {
                    let archive_period = self.archive.archive_period(source, &period);
                    if let Some(previous) = current.replace(archive_period)
                        && previous != archive_period
                    {
                        self.compact(previous, reference, &mut summary).await;
                    }
                    self.ingest_period(source, period, persist, &mut summary)
                        .await;
                }
                if let Some(last) = current {
                    self.compact(last, reference, &mut summary).await;
                }
            }
        }

        self.finish(name, &summary);
        Ok(summary)
    }

    async fn ingest_period(
        &self,
        source: SourceType,
        period: FetchPeriod,
        persist: bool,
        summary: &mut RunSummary,
    ) {
        let batch = match self.replay(source, period) {
            Some(batch) => {
                summary.replayed += 1;
                batch
            }
            None => match self.fetcher.fetch(source, period).await {
                Ok(batch) => {
                    self.store(&batch, summary);
                    batch
                }
                Err(e) => {
                    warn!(source = %source, period = %period, error = %e, "Period failed");
                    summary.record_failure(source, period, e);
                    return;
                }
            },
        };

        if persist
            && let Err(e) = self.write_records(source, batch.records, summary).await
        {
            warn!(source = %source, period = %period, error = %e, "Persisting period failed");
            summary.record_failure(source, period, e);
            return;
        }

        summary.succeeded.push((source, period));
    }

    /// Stored payload of a period, if it was stored and still decodes
    fn replay(&self, source: SourceType, period: FetchPeriod) -> Option<RawBatch> {
        let payload = match self.archive.read_raw(source, &period) {
            Ok(payload) => payload?,
            Err(e) => {
                warn!(source = %source, period = %period, error = %e, "Cannot read stored payload, refetching");
                return None;
            }
        };

        match RawBatch::from_payload(source, period, payload) {
            Ok(batch) => {
                debug!(source = %source, period = %period, records = batch.records.len(), "Replaying stored payload");
                Some(batch)
            }
            Err(e) => {
                warn!(source = %source, period = %period, error = %e, "Stored payload does not decode, refetching");
                None
            }
        }
    }

    fn store(&self, batch: &RawBatch, summary: &mut RunSummary) {
        if batch.is_empty() {
            info!(source = %batch.source, period = %batch.period, "No data published yet");
            return;
        }
        if let Err(e) = self
            .archive
            .store_raw(batch.source, &batch.period, &batch.payload)
        {
            warn!(source = %batch.source, period = %batch.period, error = %e, "Storing raw payload failed");
            summary.record_archive_failure(
                self.archive.archive_period(batch.source, &batch.period),
                e,
            );
        }
    }

    async fn compact(&self, period: ArchivePeriod, reference: NaiveDate, summary: &mut RunSummary) {
        let archive = self.archive.clone();
        let result = tokio::task::spawn_blocking(move || archive.compact_if_needed(&period, reference))
            .await
            .map_err(|e| Error::Other(format!("compaction task failed: {}", e)))
            .and_then(|r| r.map_err(Error::from));

        match result {
            Ok(outcome @ (CompactionOutcome::Archived { .. } | CompactionOutcome::Merged { .. })) => {
                info!(period = %period, outcome = ?outcome, "Archive period compacted");
                summary.archived.push((period, outcome));
            }
            Ok(outcome) => debug!(period = %period, outcome = ?outcome, "No compaction needed"),
            Err(e) => {
                warn!(period = %period, error = %e, "Compaction failed, raw files kept");
                summary.record_archive_failure(period, e);
            }
        }
    }

    async fn persist_archive_period(&self, period: &ArchivePeriod, summary: &mut RunSummary) {
        let materialized = match self.archive.materialize(period) {
            Ok(materialized) => materialized,
            Err(e) => {
                warn!(period = %period, error = %e, "Cannot read archive period");
                summary.record_archive_failure(*period, e);
                return;
            }
        };

        let mut records: Vec<RawRecord> = Vec::new();
        let mut decoded_periods: Vec<FetchPeriod> = Vec::new();
        for file in materialized.files() {
            let decoded = tokio::fs::read(&file.path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| parse_payload(period.source, &bytes).map_err(|e| e.to_string()));
            match decoded {
                Ok(decoded) => {
                    records.extend(decoded);
                    decoded_periods.push(file.period);
                }
                Err(cause) => {
                    warn!(period = %file.period, path = ?file.path, error = %cause, "Stored payload unusable");
                    summary.record_failure(period.source, file.period, cause);
                }
            }
        }

        info!(period = %period, records = records.len(), "Persisting archive period");
        match self.write_records(period.source, records, summary).await {
            Ok(()) => {
                summary.replayed += decoded_periods.len();
                summary
                    .succeeded
                    .extend(decoded_periods.into_iter().map(|p| (period.source, p)));
            }
            Err(e) => {
                warn!(period = %period, error = %e, "Persisting archive period failed");
                let cause = e.to_string();
                for fetch_period in decoded_periods {
                    summary.record_failure(period.source, fetch_period, &cause);
                }
            }
        }
    }

    /// Enrich records and insert them in batches
    async fn write_records(
        &self,
        source: SourceType,
        records: Vec<RawRecord>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut enriched: Vec<EnrichedRecord> = Vec::with_capacity(records.len());
        for record in records {
            match enrich(record) {
                Ok(record) => enriched.push(record),
                Err(e) => {
                    debug!(error = %e, "Skipping record");
                    summary.malformed.push(e);
                }
            }
        }

        let schema = TableSchema::for_source(source);
        for chunk in enriched.chunks(self.config.persistence.batch_size) {
            let result = self.db.insert_batch(chunk, schema).await?;
            summary.record_batch(source, result);
        }
        Ok(())
    }

    fn banner(&self, title: &str) {
        if let Some(log) = &self.log
            && let Err(e) = log.banner(title)
        {
            warn!(path = ?log.path(), error = %e, "Cannot write to run log");
        }
    }

    fn finish(&self, name: &str, summary: &RunSummary) {
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            inserted = summary.inserted,
            skipped = summary.skipped(),
            archived = summary.archived.len(),
            "Finished {}",
            name
        );
        if let Some(log) = &self.log
            && let Err(e) = log.write_block(&summary.to_string())
        {
            warn!(path = ?log.path(), error = %e, "Cannot write to run log");
        }
        self.banner(&format!("{} finished", name));
    }
}

/// Last month published as of `reference_date`, as (year, month)
///
/// Data for a month appears `lag_days` after it ends: up to and including
/// that day of the month, the latest month is two months back, afterwards
/// it is the previous month.
pub fn latest_available_month(reference_date: NaiveDate, lag_days: u32) -> (i32, u32) {
    let back = if reference_date.day() <= lag_days { 2 } else { 1 };
    let index = reference_date.year() * 12 + reference_date.month0() as i32 - back;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

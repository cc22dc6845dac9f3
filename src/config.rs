//! Configuration types for energy-ingest

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Filesystem locations (raw data, bundles, scratch space, logs)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the raw per-day/per-month files (default: "./Data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the compressed bundles (default: "./Data", next to the raw files)
    #[serde(default = "default_data_dir")]
    pub archive_dir: PathBuf,

    /// Where bundles are extracted for reading (default: system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Directory of the daily run logs (default: "./Log")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            archive_dir: default_data_dir(),
            scratch_dir: None,
            log_dir: default_log_dir(),
        }
    }
}

/// Storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file (default: "./Database/energie_data.sqlite")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Records per insert batch (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            batch_size: default_batch_size(),
        }
    }
}

/// Upstream endpoints and request behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Base URL of the Elia open data API (records endpoint is appended)
    #[serde(default = "default_elia_base_url")]
    pub elia_base_url: String,

    /// Dataset id for solar data (default: "ods032")
    #[serde(default = "default_solar_dataset")]
    pub solar_dataset: String,

    /// Dataset id for wind data (default: "ods031")
    #[serde(default = "default_wind_dataset")]
    pub wind_dataset: String,

    /// Region refine for solar requests (default: "Belgium", avoids regional duplicates)
    #[serde(default = "default_solar_region")]
    pub solar_region: Option<String>,

    /// Region refine for wind requests (default: none)
    #[serde(default)]
    pub wind_region: Option<String>,

    /// Records per page; the API caps this at 100
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// CSV export URL with `{from}` and `{until}` placeholders (dd/mm/yyyy)
    #[serde(default)]
    pub price_export_url: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            elia_base_url: default_elia_base_url(),
            solar_dataset: default_solar_dataset(),
            wind_dataset: default_wind_dataset(),
            solar_region: default_solar_region(),
            wind_region: None,
            page_limit: default_page_limit(),
            price_export_url: None,
        }
    }
}

/// Retry behavior for transient source failures
///
/// The delay before retry `i` (0-based) is `schedule[i]` when an explicit
/// schedule is given (the last entry repeats), otherwise
/// `initial_delay * backoff_multiplier^i` capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 1.0, constant delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Explicit per-retry delays in seconds; overrides the exponential form
    #[serde(default, with = "duration_list_serde")]
    pub schedule: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            schedule: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Retry config that never waits, for tests and stubs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            schedule: Vec::new(),
        }
    }

    /// Delay before retry number `retry` (0 = first retry), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        if let Some(last) = self.schedule.last() {
            return self
                .schedule
                .get(retry as usize)
                .copied()
                .unwrap_or(*last);
        }
        let factor = self.backoff_multiplier.max(0.0).powi(retry as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.initial_delay.min(self.max_delay));
        }
        Duration::from_secs_f64(secs)
    }

    /// Total attempts, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// How raw files are grouped into bundles
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveGranularity {
    /// One bundle per source and calendar year (default)
    #[default]
    Year,
    /// One bundle per source and calendar month
    Month,
}

/// Archive compaction settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Bundle granularity
    #[serde(default)]
    pub granularity: ArchiveGranularity,
}

/// Main configuration, passed to the orchestrator at construction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Upstream endpoints
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Archive compaction
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Days after a month ends before its data is published (default: 4)
    #[serde(default = "default_publication_lag_days")]
    pub publication_lag_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            persistence: PersistenceConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            archive: ArchiveConfig::default(),
            publication_lag_days: default_publication_lag_days(),
        }
    }
}

impl Config {
    /// Configuration rooted at a single base directory
    ///
    /// Mirrors the default layout (`Data/`, `Log/`, `Database/`) under `base`.
    pub fn with_base_dir(base: &Path) -> Self {
        let mut config = Self::default();
        config.paths.data_dir = base.join("Data");
        config.paths.archive_dir = base.join("Data");
        config.paths.log_dir = base.join("Log");
        config.persistence.database_path = base.join("Database").join("energie_data.sqlite");
        config
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.persistence.batch_size == 0 {
            return Err(Error::Config {
                message: "batch_size must be at least 1".to_string(),
                key: Some("batch_size".to_string()),
            });
        }
        if self.fetch.page_limit == 0 || self.fetch.page_limit > 100 {
            return Err(Error::Config {
                message: format!(
                    "page_limit must be between 1 and 100, got {}",
                    self.fetch.page_limit
                ),
                key: Some("page_limit".to_string()),
            });
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 0.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be a non-negative number".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        if let Some(url) = &self.fetch.price_export_url
            && !(url.contains("{from}") && url.contains("{until}"))
        {
            return Err(Error::Config {
                message: "price_export_url must contain {from} and {until}".to_string(),
                key: Some("price_export_url".to_string()),
            });
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./Data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./Log")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./Database/energie_data.sqlite")
}

fn default_batch_size() -> usize {
    1000
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_elia_base_url() -> String {
    "https://opendata.elia.be/api/explore/v2.1/catalog/datasets".to_string()
}

fn default_solar_dataset() -> String {
    "ods032".to_string()
}

fn default_wind_dataset() -> String {
    "ods031".to_string()
}

fn default_solar_region() -> Option<String> {
    Some("Belgium".to_string())
}

fn default_page_limit() -> u32 {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_publication_lag_days() -> u32 {
    4
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod duration_list_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(durations.iter().map(Duration::as_secs_f64))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<f64>::deserialize(deserializer)?
            .into_iter()
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .collect()
    }
}

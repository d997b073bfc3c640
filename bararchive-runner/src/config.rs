//! Archive configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! CLI flags override individual values after loading.

use bararchive_core::domain::{Granularity, HourlyWindow, PartitionLayout};
use bararchive_core::provider::{BarResolution, Timespan};
use bararchive_core::retry::RetryPolicy;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Upstream fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub multiplier: u32,
    pub timespan: Timespan,
    /// Retries per request after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
    pub adjusted: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            multiplier: 1,
            timespan: Timespan::Minute,
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
            adjusted: true,
        }
    }
}

impl FetchConfig {
    pub fn resolution(&self) -> BarResolution {
        BarResolution {
            multiplier: self.multiplier,
            timespan: self.timespan,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reference-data refresh settings for `setup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SetupConfig {
    /// Provider market filter for the ticker listing.
    pub market: String,
    pub exchanges: Vec<String>,
    /// Pause between per-ticker detail requests.
    pub detail_delay_ms: u64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            market: "stocks".into(),
            exchanges: vec!["XNAS".into(), "XNYS".into()],
            detail_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Local directory backing the object store.
    pub storage_dir: PathBuf,
    /// Key prefix under which all partitions live.
    pub archive_root: String,
    pub checkpoint_path: PathBuf,
    /// Calendar market identifier.
    pub market: String,
    /// Exchange timezone; partition dates and hours are local to it.
    pub timezone: String,
    /// Inception date for series with no data and no checkpoint.
    pub archive_epoch: NaiveDate,
    pub granularity: Granularity,
    pub hourly: HourlyWindow,
    /// Objects smaller than this are treated as absent.
    pub min_partition_bytes: u64,
    pub workers: usize,
    /// Drop an unresolved date after this many failed attempts. Unset retries forever.
    pub max_unit_attempts: Option<u32>,
    pub holiday_schedule: Option<PathBuf>,
    /// Series to track. Unset means discover from the archive.
    pub tickers: Option<Vec<String>>,
    pub fetch: FetchConfig,
    pub setup: SetupConfig,
    pub tickers_metadata_key: String,
    pub details_metadata_key: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("data"),
            archive_root: "historical_ohlcv".into(),
            checkpoint_path: PathBuf::from("logs/backfill_report.csv"),
            market: "XNYS".into(),
            timezone: "America/New_York".into(),
            archive_epoch: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
            granularity: Granularity::Daily,
            hourly: HourlyWindow::default(),
            min_partition_bytes: 64,
            workers: 4,
            max_unit_attempts: None,
            holiday_schedule: None,
            tickers: None,
            fetch: FetchConfig::default(),
            setup: SetupConfig::default(),
            tickers_metadata_key: "metadata/tickers".into(),
            details_metadata_key: "metadata/ticker_details".into(),
        }
    }
}

impl ArchiveConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.trim().is_empty() {
            return Err(ConfigError::Invalid("market must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.fetch.multiplier == 0 {
            return Err(ConfigError::Invalid("fetch.multiplier must be at least 1".into()));
        }
        if self.max_unit_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_unit_attempts must be at least 1 when set".into(),
            ));
        }
        if self.tickers.as_ref().is_some_and(|t| t.iter().any(|s| s.trim().is_empty())) {
            return Err(ConfigError::Invalid("tickers must not contain empty symbols".into()));
        }
        self.hourly.validate().map_err(ConfigError::Invalid)?;
        self.market_tz()?;
        Ok(())
    }

    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout::new(self.archive_root.clone())
    }

    pub fn market_tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone '{}': {e}", self.timezone)))
    }
}

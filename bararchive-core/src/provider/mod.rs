//! Upstream market-data provider: trait, error types and fetch windows.
//!
//! The provider only knows how to return bars for a time window. Partition
//! placement, existence checks and storage writes happen above this layer.

pub mod circuit_breaker;
pub mod polygon;

pub use circuit_breaker::CircuitBreaker;
pub use polygon::PolygonProvider;

use crate::domain::{Bar, PartitionCoordinate, TickerDetails, TickerRecord};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid fetch window: {0}")]
    InvalidWindow(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Worth retrying the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::Timeout(_)
                | DataError::RateLimited { .. }
                | DataError::ServerError { .. }
        )
    }

    /// Minimum wait the provider asked for before the next request.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            DataError::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Half-open UTC window `[start, end)` to fetch bars for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window covering exactly one partition: the exchange-local day, or the
    /// exchange-local hour when the coordinate has one.
    pub fn for_coordinate(coord: &PartitionCoordinate, tz: Tz) -> Result<Self, DataError> {
        match coord.hour {
            None => Self::for_dates(coord.date, coord.date, tz),
            Some(hour) => {
                let time = NaiveTime::from_hms_opt(hour as u32, 0, 0)
                    .ok_or_else(|| DataError::InvalidWindow(format!("hour {hour}")))?;
                let start = local_instant(coord.date, time, tz)?;
                Ok(Self {
                    start,
                    end: start + Duration::hours(1),
                })
            }
        }
    }

    /// Window from local midnight of `first` to local midnight after `last`.
    pub fn for_dates(first: NaiveDate, last: NaiveDate, tz: Tz) -> Result<Self, DataError> {
        if first > last {
            return Err(DataError::InvalidWindow(format!("{first} is after {last}")));
        }
        let after = last
            .succ_opt()
            .ok_or_else(|| DataError::InvalidWindow(format!("no day after {last}")))?;
        Ok(Self {
            start: local_instant(first, NaiveTime::MIN, tz)?,
            end: local_instant(after, NaiveTime::MIN, tz)?,
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<Utc>, DataError> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| DataError::InvalidWindow(format!("{date} {time} does not exist in {tz}")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timespan {
    #[default]
    Minute,
    Hour,
    Day,
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timespan::Minute => write!(f, "minute"),
            Timespan::Hour => write!(f, "hour"),
            Timespan::Day => write!(f, "day"),
        }
    }
}

/// Bar size requested from the provider, e.g. 1 minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarResolution {
    pub multiplier: u32,
    pub timespan: Timespan,
}

impl Default for BarResolution {
    fn default() -> Self {
        Self {
            multiplier: 1,
            timespan: Timespan::Minute,
        }
    }
}

/// Source of bar data.
pub trait BarProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bars whose timestamp falls in `window`, ascending. No data is `Ok(vec![])`.
    fn fetch_bars(
        &self,
        series: &str,
        window: &FetchWindow,
        resolution: &BarResolution,
    ) -> Result<Vec<Bar>, DataError>;

    /// False once the provider has blocked requests (circuit breaker open).
    fn is_available(&self) -> bool;
}

/// Source of ticker reference data.
pub trait ReferenceProvider: Send + Sync {
    /// Active tickers listed on `exchange` within `market` (e.g. `stocks`).
    fn list_tickers(&self, market: &str, exchange: &str) -> Result<Vec<TickerRecord>, DataError>;

    /// Detail record plus the names of quarantined fields.
    fn ticker_details(&self, ticker: &str) -> Result<(TickerDetails, Vec<String>), DataError>;
}

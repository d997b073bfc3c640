//! Bar: one OHLCV row as delivered by the upstream provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar at the provider's native resolution (minute bars by default).
///
/// Timestamps are UTC instants marking the start of the bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub transactions: Option<u64>,
}

impl Bar {
    /// Basic OHLC sanity check: high bounds everything, low is bounded by everything.
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| p.is_nan()) {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
    }
}

//! The `setup` task: refresh the ticker listing and per-ticker details.
//!
//! Both tables are written as parquet objects under the configured metadata
//! keys. Detail records go through the fixed `TickerDetails` schema; any
//! unexpected provider field is quarantined and counted here.

use crate::config::SetupConfig;
use bararchive_core::codec::{encode_details, encode_tickers, CodecError};
use bararchive_core::domain::{TickerDetails, TickerRecord};
use bararchive_core::provider::{DataError, ReferenceProvider};
use bararchive_core::storage::{ObjectStore, StorageError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("ticker listing failed for every exchange: {0}")]
    Listing(#[source] DataError),

    #[error("encode: {0}")]
    Codec(#[from] CodecError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Where the metadata tables are written.
#[derive(Debug, Clone)]
pub struct MetadataKeys {
    pub tickers: String,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub tickers: usize,
    pub details: usize,
    pub detail_failures: usize,
    /// Quarantined provider field name -> number of records carrying it.
    pub quarantined: BTreeMap<String, usize>,
    pub cancelled: bool,
}

/// List active tickers on every configured exchange, then fetch their details.
///
/// A listing failure on one exchange is logged and skipped; only when every
/// exchange fails is the task an error. Detail failures are counted and
/// skipped. An open circuit breaker stops the detail pass early.
pub fn refresh_metadata(
    reference: &dyn ReferenceProvider,
    store: &dyn ObjectStore,
    config: &SetupConfig,
    keys: &MetadataKeys,
    cancel: Option<&AtomicBool>,
) -> Result<SetupReport, SetupError> {
    let mut listing: BTreeMap<String, TickerRecord> = BTreeMap::new();
    let mut last_err = None;
    let mut listed_any = false;
    for exchange in &config.exchanges {
        match reference.list_tickers(&config.market, exchange) {
            Ok(records) => {
                info!(%exchange, tickers = records.len(), "listed tickers");
                listed_any = true;
                for r in records {
                    listing.entry(r.ticker.clone()).or_insert(r);
                }
            }
            Err(e) => {
                warn!(%exchange, error = %e, "ticker listing failed");
                last_err = Some(e);
            }
        }
    }
    if !listed_any {
        if let Some(e) = last_err {
            return Err(SetupError::Listing(e));
        }
    }

    let records: Vec<TickerRecord> = listing.into_values().collect();
    store.put(&keys.tickers, &encode_tickers(&records)?)?;
    info!(key = %keys.tickers, tickers = records.len(), "stored ticker listing");

    let mut report = SetupReport {
        tickers: records.len(),
        ..Default::default()
    };
    let delay = Duration::from_millis(config.detail_delay_ms);
    let mut details: Vec<TickerDetails> = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            report.cancelled = true;
            break;
        }
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match reference.ticker_details(&record.ticker) {
            Ok((detail, quarantined)) => {
                if !quarantined.is_empty() {
                    warn!(ticker = %record.ticker, fields = ?quarantined, "quarantined unexpected detail fields");
                }
                for field in quarantined {
                    *report.quarantined.entry(field).or_default() += 1;
                }
                details.push(detail);
            }
            Err(DataError::CircuitBreakerTripped) => {
                warn!(remaining = records.len() - i, "circuit breaker open, stopping detail fetch");
                report.detail_failures += records.len() - i;
                break;
            }
            Err(e) => {
                warn!(ticker = %record.ticker, error = %e, "detail fetch failed");
                report.detail_failures += 1;
            }
        }
    }

    store.put(&keys.details, &encode_details(&details)?)?;
    report.details = details.len();
    info!(
        key = %keys.details,
        details = report.details,
        failures = report.detail_failures,
        quarantined_fields = report.quarantined.len(),
        "stored ticker details"
    );
    Ok(report)
}

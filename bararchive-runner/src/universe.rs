//! Which series a task runs over.

use bararchive_core::codec::decode_ticker_symbols;
use bararchive_core::inventory::InventoryScanner;
use bararchive_core::storage::{ObjectStore, StorageError};
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniverseSource {
    CommandLine,
    Config,
    Archive,
    Metadata,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub series: Vec<String>,
    pub source: UniverseSource,
}

/// Resolve the series list: explicit list, then config, then the archive
/// itself, then the stored ticker listing.
///
/// Explicit symbols are upper-cased and deduplicated, keeping first-seen order.
/// A missing or unreadable ticker listing yields an empty universe rather than
/// an error; only fatal storage errors propagate.
pub fn resolve_universe(
    cli: Option<&[String]>,
    config: Option<&[String]>,
    scanner: &InventoryScanner,
    store: &dyn ObjectStore,
    tickers_key: &str,
) -> Result<Universe, StorageError> {
    if let Some(list) = cli.filter(|l| !l.is_empty()) {
        return Ok(explicit(list, UniverseSource::CommandLine));
    }
    if let Some(list) = config.filter(|l| !l.is_empty()) {
        return Ok(explicit(list, UniverseSource::Config));
    }

    let discovered = scanner.discover_series()?;
    if !discovered.is_empty() {
        info!(series = discovered.len(), "discovered series in archive");
        return Ok(Universe {
            series: discovered,
            source: UniverseSource::Archive,
        });
    }

    let bytes = match store.get(tickers_key) {
        Ok(b) => b,
        Err(e) if e.is_fatal() => return Err(e),
        Err(StorageError::NotFound { .. }) => {
            warn!(key = tickers_key, "archive is empty and no ticker listing is stored");
            return Ok(Universe {
                series: Vec::new(),
                source: UniverseSource::Empty,
            });
        }
        Err(e) => {
            warn!(key = tickers_key, error = %e, "failed to read ticker listing");
            return Ok(Universe {
                series: Vec::new(),
                source: UniverseSource::Empty,
            });
        }
    };
    match decode_ticker_symbols(&bytes) {
        Ok(symbols) => {
            info!(series = symbols.len(), key = tickers_key, "loaded series from ticker listing");
            Ok(Universe {
                series: symbols,
                source: UniverseSource::Metadata,
            })
        }
        Err(e) => {
            warn!(key = tickers_key, error = %e, "ticker listing is unreadable");
            Ok(Universe {
                series: Vec::new(),
                source: UniverseSource::Empty,
            })
        }
    }
}

fn explicit(list: &[String], source: UniverseSource) -> Universe {
    let mut seen = BTreeSet::new();
    let series = list
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();
    Universe { series, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bararchive_core::codec::encode_tickers;
    use bararchive_core::domain::{Granularity, PartitionLayout, TickerRecord};
    use bararchive_core::storage::MemoryObjectStore;
    use std::sync::Arc;

    fn scanner(store: Arc<MemoryObjectStore>) -> InventoryScanner {
        InventoryScanner::new(store, PartitionLayout::new("archive"), Granularity::Daily, 1)
    }

    #[test]
    fn command_line_wins_and_is_normalized() {
        let store = Arc::new(MemoryObjectStore::new());
        let cli = vec!["aapl".to_string(), " MSFT ".into(), "AAPL".into()];
        let cfg = vec!["IBM".to_string()];
        let u = resolve_universe(Some(&cli), Some(&cfg), &scanner(store.clone()), store.as_ref(), "meta")
            .unwrap();
        assert_eq!(u.source, UniverseSource::CommandLine);
        assert_eq!(u.series, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn archive_then_metadata_fallback() {
        let store = Arc::new(MemoryObjectStore::new());
        let u = resolve_universe(None, None, &scanner(store.clone()), store.as_ref(), "meta").unwrap();
        assert_eq!(u.source, UniverseSource::Empty);

        let records: Vec<TickerRecord> = ["IBM", "AAPL"]
            .iter()
            .map(|t| serde_json::from_value(serde_json::json!({ "ticker": t })).unwrap())
            .collect();
        store.put("meta", &encode_tickers(&records).unwrap()).unwrap();
        let u = resolve_universe(None, None, &scanner(store.clone()), store.as_ref(), "meta").unwrap();
        assert_eq!(u.source, UniverseSource::Metadata);
        assert_eq!(u.series, vec!["IBM", "AAPL"]);

        store
            .put("archive/ticker=XYZ/year=2024/month=01/day=02", b"PAR1")
            .unwrap();
        let u = resolve_universe(None, None, &scanner(store.clone()), store.as_ref(), "meta").unwrap();
        assert_eq!(u.source, UniverseSource::Archive);
        assert_eq!(u.series, vec!["XYZ"]);
    }
}

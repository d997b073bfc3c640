//! Backfill driver: fetch each missing unit and write it at its partition key.
//!
//! One unit failing never stops the batch. Only a fatal storage error (bad
//! credentials) aborts, because nothing after it could succeed either.

use crate::reconcile::MissingUnit;
use bararchive_core::codec::encode_bars;
use bararchive_core::domain::{Bar, PartitionCoordinate, PartitionLayout};
use bararchive_core::provider::{BarProvider, BarResolution, DataError, FetchWindow};
use bararchive_core::retry::RetryPolicy;
use bararchive_core::storage::{ObjectStore, StorageError};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    Written { rows: usize, bytes: usize },
    /// Upstream returned no rows; nothing was written.
    EmptyUpstream,
    Failed(String),
}

impl BackfillOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, BackfillOutcome::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillResult {
    pub coordinate: PartitionCoordinate,
    pub outcome: BackfillOutcome,
    /// An upstream request was issued for this unit.
    pub requested: bool,
}

/// Per-unit results for one series, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub results: Vec<BackfillResult>,
    /// Stopped before attempting every unit.
    pub aborted: bool,
}

impl BackfillReport {
    pub fn written(&self) -> usize {
        self.count(|o| o.is_written())
    }

    pub fn empty(&self) -> usize {
        self.count(|o| matches!(o, BackfillOutcome::EmptyUpstream))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, BackfillOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&BackfillOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct BackfillDriver {
    provider: Arc<dyn BarProvider>,
    store: Arc<dyn ObjectStore>,
    layout: PartitionLayout,
    tz: Tz,
    resolution: BarResolution,
    storage_retry: RetryPolicy,
}

impl BackfillDriver {
    pub fn new(
        provider: Arc<dyn BarProvider>,
        store: Arc<dyn ObjectStore>,
        layout: PartitionLayout,
        tz: Tz,
        resolution: BarResolution,
    ) -> Self {
        Self {
            provider,
            store,
            layout,
            tz,
            resolution,
            storage_retry: RetryPolicy::default(),
        }
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Fetch and write every unit, in order.
    ///
    /// Checks `cancel` before each unit; a cancelled batch returns the results
    /// gathered so far with `aborted` set.
    pub fn backfill(
        &self,
        units: &[MissingUnit],
        cancel: Option<&AtomicBool>,
    ) -> Result<BackfillReport, StorageError> {
        let mut report = BackfillReport {
            results: Vec::with_capacity(units.len()),
            aborted: false,
        };
        for unit in units {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                report.aborted = true;
                break;
            }
            let result = self.write_unit(&unit.coordinate)?;
            debug!(unit = %unit.coordinate, reason = %unit.reason, outcome = ?result.outcome, "unit done");
            report.results.push(result);
        }
        Ok(report)
    }

    /// Fetch one partition and store it if upstream has rows.
    pub fn write_unit(&self, coord: &PartitionCoordinate) -> Result<BackfillResult, StorageError> {
        let done = |outcome, requested| BackfillResult {
            coordinate: coord.clone(),
            outcome,
            requested,
        };

        if !self.provider.is_available() {
            return Ok(done(
                BackfillOutcome::Failed(DataError::CircuitBreakerTripped.to_string()),
                false,
            ));
        }

        let window = match FetchWindow::for_coordinate(coord, self.tz) {
            Ok(w) => w,
            Err(e) => return Ok(done(BackfillOutcome::Failed(e.to_string()), false)),
        };

        let bars = match self
            .provider
            .fetch_bars(&coord.series, &window, &self.resolution)
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(unit = %coord, provider = self.provider.name(), error = %e, "fetch failed");
                let requested = !matches!(e, DataError::CircuitBreakerTripped);
                return Ok(done(BackfillOutcome::Failed(e.to_string()), requested));
            }
        };

        let fetched = bars.len();
        let bars: Vec<_> = bars.into_iter().filter(|b| window.contains(b.timestamp)).collect();
        if bars.len() < fetched {
            debug!(unit = %coord, dropped = fetched - bars.len(), "dropped rows outside the partition window");
        }
        let in_window = bars.len();
        let bars: Vec<_> = bars.into_iter().filter(Bar::is_sane).collect();
        if bars.len() < in_window {
            warn!(unit = %coord, dropped = in_window - bars.len(), "dropped rows failing the OHLC sanity check");
        }
        if bars.is_empty() {
            debug!(unit = %coord, "upstream returned no rows");
            return Ok(done(BackfillOutcome::EmptyUpstream, true));
        }

        let bytes = match encode_bars(&bars) {
            Ok(b) => b,
            Err(e) => {
                warn!(unit = %coord, error = %e, "encode failed");
                return Ok(done(BackfillOutcome::Failed(e.to_string()), true));
            }
        };

        let key = self.layout.key(coord);
        match self
            .storage_retry
            .run(|_| self.store.put(&key, &bytes), StorageError::is_transient)
        {
            Ok(()) => Ok(done(
                BackfillOutcome::Written {
                    rows: bars.len(),
                    bytes: bytes.len(),
                },
                true,
            )),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(unit = %coord, %key, error = %e, "write failed");
                Ok(done(BackfillOutcome::Failed(e.to_string()), true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::MissingReason;
    use bararchive_core::codec::decode_bars;
    use bararchive_core::storage::MemoryObjectStore;
    use chrono::{Duration, NaiveDate};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Provider that returns one bar per local hour of the window, with
    /// configurable failures and empty dates.
    #[derive(Default)]
    struct StubProvider {
        fail: HashSet<NaiveDate>,
        empty: HashSet<NaiveDate>,
        /// Dates whose first bar has high below low.
        corrupt_first: HashSet<NaiveDate>,
        calls: Mutex<Vec<NaiveDate>>,
        unavailable: bool,
    }

    impl BarProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch_bars(
            &self,
            _series: &str,
            window: &FetchWindow,
            _resolution: &BarResolution,
        ) -> Result<Vec<Bar>, DataError> {
            let date = window.start.with_timezone(&chrono_tz::America::New_York).date_naive();
            self.calls.lock().unwrap().push(date);
            if self.fail.contains(&date) {
                return Err(DataError::Timeout("stub timeout".into()));
            }
            if self.empty.contains(&date) {
                return Ok(vec![]);
            }
            let mut bars = Vec::new();
            let mut ts = window.start;
            while ts < window.end {
                bars.push(Bar {
                    timestamp: ts,
                    open: 10.0,
                    high: 11.0,
                    low: 9.0,
                    close: 10.5,
                    volume: 1.0,
                    vwap: None,
                    transactions: None,
                });
                ts += Duration::hours(1);
            }
            if self.corrupt_first.contains(&date) {
                bars[0].high = bars[0].low - 1.0;
            }
            // One row past the window end must be dropped
            bars.push(Bar {
                timestamp: window.end,
                ..bars[0].clone()
            });
            Ok(bars)
        }

        fn is_available(&self) -> bool {
            !self.unavailable
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn units(dates: &[NaiveDate]) -> Vec<MissingUnit> {
        dates
            .iter()
            .map(|d| MissingUnit {
                coordinate: PartitionCoordinate::daily("XYZ", *d),
                reason: MissingReason::NeverFetched,
            })
            .collect()
    }

    fn driver(provider: StubProvider, store: Arc<MemoryObjectStore>) -> BackfillDriver {
        BackfillDriver::new(
            Arc::new(provider),
            store,
            PartitionLayout::new("archive"),
            chrono_tz::America::New_York,
            BarResolution::default(),
        )
        .with_storage_retry(RetryPolicy::none())
    }

    #[test]
    fn failure_is_isolated_to_its_unit() {
        let dates = [d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 5), d(2024, 1, 8)];
        let provider = StubProvider {
            fail: HashSet::from([dates[2]]),
            ..Default::default()
        };
        let store = Arc::new(MemoryObjectStore::new());
        let report = driver(provider, store.clone())
            .backfill(&units(&dates), None)
            .unwrap();

        assert_eq!(report.results.len(), 5);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.written(), 4);
        assert!(matches!(report.results[2].outcome, BackfillOutcome::Failed(_)));
        let result_dates: Vec<_> = report.results.iter().map(|r| r.coordinate.date).collect();
        assert_eq!(result_dates, dates);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn empty_upstream_writes_nothing() {
        let provider = StubProvider {
            empty: HashSet::from([d(2024, 1, 2)]),
            ..Default::default()
        };
        let store = Arc::new(MemoryObjectStore::new());
        let report = driver(provider, store.clone())
            .backfill(&units(&[d(2024, 1, 2)]), None)
            .unwrap();
        assert_eq!(report.results[0].outcome, BackfillOutcome::EmptyUpstream);
        assert!(store.is_empty());
    }

    #[test]
    fn written_object_holds_only_window_rows() {
        let store = Arc::new(MemoryObjectStore::new());
        let drv = driver(StubProvider::default(), store.clone());
        let coord = PartitionCoordinate::daily("XYZ", d(2024, 1, 2));
        let result = drv.write_unit(&coord).unwrap();
        assert_eq!(
            result.outcome,
            BackfillOutcome::Written {
                rows: 24,
                bytes: store.get(&drv.layout().key(&coord)).unwrap().len()
            }
        );
        let bars = decode_bars(&store.get(&drv.layout().key(&coord)).unwrap()).unwrap();
        assert_eq!(bars.len(), 24);
    }

    #[test]
    fn rows_failing_sanity_are_not_written() {
        let provider = StubProvider {
            corrupt_first: HashSet::from([d(2024, 1, 2)]),
            ..Default::default()
        };
        let store = Arc::new(MemoryObjectStore::new());
        let drv = driver(provider, store.clone());
        let coord = PartitionCoordinate::daily("XYZ", d(2024, 1, 2));
        let result = drv.write_unit(&coord).unwrap();
        assert!(matches!(result.outcome, BackfillOutcome::Written { rows: 23, .. }));
        let bars = decode_bars(&store.get(&drv.layout().key(&coord)).unwrap()).unwrap();
        assert!(bars.iter().all(Bar::is_sane));
    }

    #[test]
    fn write_failure_is_recorded_not_raised() {
        let store = Arc::new(MemoryObjectStore::new());
        let layout = PartitionLayout::new("archive");
        store.fail_puts_for(layout.key(&PartitionCoordinate::daily("XYZ", d(2024, 1, 3))));
        let report = driver(StubProvider::default(), store.clone())
            .backfill(&units(&[d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)]), None)
            .unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.written(), 2);
    }

    #[test]
    fn open_breaker_short_circuits_without_requests() {
        let provider = Arc::new(StubProvider {
            unavailable: true,
            ..Default::default()
        });
        let drv = BackfillDriver::new(
            provider.clone(),
            Arc::new(MemoryObjectStore::new()),
            PartitionLayout::new("archive"),
            chrono_tz::America::New_York,
            BarResolution::default(),
        );
        let report = drv.backfill(&units(&[d(2024, 1, 2), d(2024, 1, 3)]), None).unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| !r.requested));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_stops_before_next_unit() {
        let cancel = AtomicBool::new(true);
        let report = driver(StubProvider::default(), Arc::new(MemoryObjectStore::new()))
            .backfill(&units(&[d(2024, 1, 2)]), Some(&cancel))
            .unwrap();
        assert!(report.aborted);
        assert!(report.results.is_empty());
    }
}

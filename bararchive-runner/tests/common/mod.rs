//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use bararchive_core::calendar::{calendar_for_market, HolidaySchedule};
use bararchive_core::domain::{Bar, Granularity, HourlyWindow, PartitionCoordinate, PartitionLayout};
use bararchive_core::inventory::InventoryScanner;
use bararchive_core::provider::{BarProvider, BarResolution, DataError, FetchWindow};
use bararchive_core::retry::RetryPolicy;
use bararchive_core::storage::{MemoryObjectStore, ObjectStore};
use bararchive_runner::{BackfillDriver, Reconciler, RunContext};
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const ROOT: &str = "historical_ohlcv";

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Provider returning one bar per local hour of the window.
#[derive(Default)]
pub struct StubProvider {
    pub fail: Mutex<HashSet<NaiveDate>>,
    pub calls: Mutex<Vec<(String, NaiveDate)>>,
    /// Set once the stub's circuit breaker has tripped.
    pub tripped: AtomicBool,
}

impl StubProvider {
    pub fn failing_on(dates: &[NaiveDate]) -> Self {
        Self {
            fail: Mutex::new(dates.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn heal(&self) {
        self.fail.lock().unwrap().clear();
        self.tripped.store(false, Ordering::SeqCst);
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl BarProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn fetch_bars(
        &self,
        series: &str,
        window: &FetchWindow,
        _resolution: &BarResolution,
    ) -> Result<Vec<Bar>, DataError> {
        let date = window
            .start
            .with_timezone(&chrono_tz::America::New_York)
            .date_naive();
        self.calls.lock().unwrap().push((series.to_string(), date));
        if self.fail.lock().unwrap().contains(&date) {
            return Err(DataError::Timeout("stub timeout".into()));
        }
        let mut bars = Vec::new();
        let mut ts = window.start;
        while ts < window.end {
            bars.push(Bar {
                timestamp: ts,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1_000.0,
                vwap: Some(100.2),
                transactions: Some(10),
            });
            ts += Duration::hours(1);
        }
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        !self.tripped.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub provider: Arc<StubProvider>,
    pub ctx: RunContext,
}

/// XNYS calendar with 2024-01-05 closed, daily granularity, epoch 2024-01-02.
pub fn harness(provider: StubProvider) -> Harness {
    harness_with(provider, Granularity::Daily)
}

pub fn harness_with(provider: StubProvider, granularity: Granularity) -> Harness {
    let store = Arc::new(MemoryObjectStore::new());
    let provider = Arc::new(provider);
    let schedule = HolidaySchedule {
        closures: vec![d(2024, 1, 5)],
        early_closes: vec![],
    };
    let calendar = Arc::new(calendar_for_market("XNYS", schedule).unwrap());
    let layout = PartitionLayout::new(ROOT);
    let ctx = RunContext {
        scanner: InventoryScanner::new(store.clone(), layout.clone(), granularity, 4),
        reconciler: Reconciler::new(calendar, granularity, HourlyWindow::default(), d(2024, 1, 2)),
        driver: BackfillDriver::new(
            provider.clone(),
            store.clone(),
            layout,
            chrono_tz::America::New_York,
            BarResolution::default(),
        )
        .with_storage_retry(RetryPolicy::none()),
    };
    Harness { store, provider, ctx }
}

/// Put a placeholder object large enough to count as present.
pub fn seed(store: &MemoryObjectStore, series: &str, dates: &[NaiveDate]) {
    let layout = PartitionLayout::new(ROOT);
    for date in dates {
        let key = layout.key(&PartitionCoordinate::daily(series, *date));
        store.put(&key, b"PAR1-placeholder-PAR1").unwrap();
    }
}

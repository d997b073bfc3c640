//! Run orchestration: reconcile and backfill every series, then save checkpoints.
//!
//! Checkpoints are loaded once, mutated in memory, and written once at the
//! end. A fatal error anywhere (calendar, checkpoint store, storage
//! credentials) aborts before the save, so the previous report stays intact.

use crate::backfill::BackfillDriver;
use crate::reconcile::Reconciler;
use bararchive_core::calendar::CalendarError;
use bararchive_core::checkpoint::{CheckpointBook, CheckpointError, CheckpointStore};
use bararchive_core::inventory::InventoryScanner;
use bararchive_core::storage::StorageError;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("calendar: {0}")]
    Calendar(#[from] CalendarError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Backfill,
    /// Reconcile and save the report without fetching.
    ReportOnly,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Exchange-local date the run treats as today.
    pub today: NaiveDate,
    pub workers: usize,
    pub max_unit_attempts: Option<u32>,
}

/// Collaborators shared by every series in a run.
pub struct RunContext {
    pub scanner: InventoryScanner,
    pub reconciler: Reconciler,
    pub driver: BackfillDriver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesStatus {
    /// Every expected partition is present.
    Reconciled,
    /// Some dates remain unresolved, or backfill stopped early.
    Partial,
    ScanFailed(String),
    /// Not processed because the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesReport {
    pub series: String,
    pub status: SeriesStatus,
    pub missing_units: usize,
    pub written: usize,
    pub empty: usize,
    pub failed: usize,
    pub last_checked: Option<NaiveDate>,
    pub unresolved: Vec<NaiveDate>,
    pub abandoned: Vec<NaiveDate>,
}

impl SeriesReport {
    fn without_work(series: &str, status: SeriesStatus) -> Self {
        Self {
            series: series.to_string(),
            status,
            missing_units: 0,
            written: 0,
            empty: 0,
            failed: 0,
            last_checked: None,
            unresolved: Vec::new(),
            abandoned: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub latest_complete: Option<NaiveDate>,
    /// One entry per requested series, in request order.
    pub series: Vec<SeriesReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn count(&self, pred: impl Fn(&SeriesStatus) -> bool) -> usize {
        self.series.iter().filter(|s| pred(&s.status)).count()
    }

    pub fn total_written(&self) -> usize {
        self.series.iter().map(|s| s.written).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.series.iter().map(|s| s.failed).sum()
    }
}

/// Progress callbacks for a run. Called from worker threads.
pub trait BackfillProgress: Send + Sync {
    fn on_series_start(&self, series: &str, index: usize, total: usize);

    fn on_series_complete(&self, report: &SeriesReport, index: usize, total: usize);

    fn on_run_complete(&self, report: &RunReport);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl BackfillProgress for LogProgress {
    fn on_series_start(&self, series: &str, index: usize, total: usize) {
        info!(series, "[{}/{}] reconciling", index + 1, total);
    }

    fn on_series_complete(&self, report: &SeriesReport, _index: usize, _total: usize) {
        match &report.status {
            SeriesStatus::Reconciled => info!(
                series = %report.series,
                written = report.written,
                "complete"
            ),
            SeriesStatus::Partial => warn!(
                series = %report.series,
                written = report.written,
                empty = report.empty,
                failed = report.failed,
                unresolved = report.unresolved.len(),
                abandoned = report.abandoned.len(),
                "partially reconciled"
            ),
            SeriesStatus::ScanFailed(reason) => {
                warn!(series = %report.series, %reason, "scan failed")
            }
            SeriesStatus::Skipped => info!(series = %report.series, "skipped"),
        }
    }

    fn on_run_complete(&self, report: &RunReport) {
        info!(
            latest_complete = ?report.latest_complete,
            series = report.series.len(),
            reconciled = report.count(|s| *s == SeriesStatus::Reconciled),
            partial = report.count(|s| *s == SeriesStatus::Partial),
            scan_failed = report.count(|s| matches!(s, SeriesStatus::ScanFailed(_))),
            skipped = report.count(|s| *s == SeriesStatus::Skipped),
            written = report.total_written(),
            failed = report.total_failed(),
            cancelled = report.cancelled,
            "run complete"
        );
    }
}

/// Reconcile (and unless report-only, backfill) every series, then save checkpoints.
///
/// Per-series scan failures and per-unit fetch/write failures are reported,
/// not raised. Checkpoints of series that were skipped or failed to scan are
/// saved unchanged.
pub fn execute_run(
    ctx: &RunContext,
    checkpoints: &dyn CheckpointStore,
    series: &[String],
    opts: &RunOptions,
    progress: &dyn BackfillProgress,
    cancel: Option<&AtomicBool>,
) -> Result<RunReport, RunError> {
    let previous = checkpoints.load()?;
    let latest_complete = ctx.reconciler.latest_complete(opts.today);
    info!(
        series = series.len(),
        today = %opts.today,
        latest_complete = ?latest_complete,
        mode = ?opts.mode,
        "starting run"
    );

    let book = Mutex::new(previous.clone());
    let fatal = AtomicBool::new(false);
    let total = series.len();

    let process = |(index, name): (usize, &String)| -> Result<SeriesReport, RunError> {
        let stop = fatal.load(Ordering::Relaxed)
            || cancel.is_some_and(|f| f.load(Ordering::Relaxed));
        if stop {
            return Ok(SeriesReport::without_work(name, SeriesStatus::Skipped));
        }
        progress.on_series_start(name, index, total);
        let result = process_series(ctx, &previous, &book, name, latest_complete, opts, cancel);
        match &result {
            Ok(report) => progress.on_series_complete(report, index, total),
            Err(e) => {
                error!(series = %name, error = %e, "fatal error, aborting run");
                fatal.store(true, Ordering::Relaxed);
            }
        }
        result
    };

    let results: Vec<Result<SeriesReport, RunError>> = if opts.workers > 1 && series.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.workers)
            .build()
            .map_err(|e| RunError::ThreadPool(e.to_string()))?;
        pool.install(|| series.par_iter().enumerate().map(process).collect())
    } else {
        series.iter().enumerate().map(process).collect()
    };

    let reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let book = book.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    checkpoints.save(&book)?;

    let report = RunReport {
        latest_complete,
        cancelled: cancel.is_some_and(|f| f.load(Ordering::Relaxed)),
        series: reports,
    };
    progress.on_run_complete(&report);
    Ok(report)
}

fn process_series(
    ctx: &RunContext,
    previous: &CheckpointBook,
    book: &Mutex<CheckpointBook>,
    series: &str,
    latest_complete: Option<NaiveDate>,
    opts: &RunOptions,
    cancel: Option<&AtomicBool>,
) -> Result<SeriesReport, RunError> {
    let inventory = match ctx.scanner.scan(series) {
        Ok(inv) => inv,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            return Ok(SeriesReport::without_work(
                series,
                SeriesStatus::ScanFailed(e.to_string()),
            ))
        }
    };

    let checkpoint = previous.get(series);
    let rec = ctx
        .reconciler
        .reconcile(series, checkpoint, &inventory, latest_complete)?;

    let (update, backfill, aborted) = match opts.mode {
        RunMode::ReportOnly => (rec.report_only(), None, false),
        RunMode::Backfill => {
            let report = ctx.driver.backfill(&rec.missing, cancel)?;
            let update = rec.finalize(&report.results, !report.aborted, opts.max_unit_attempts);
            let aborted = report.aborted;
            (update, Some(report), aborted)
        }
    };

    let unresolved: Vec<NaiveDate> = update
        .checkpoint
        .as_ref()
        .map(|c| c.unresolved.keys().copied().collect())
        .unwrap_or_default();
    let last_checked = update.checkpoint.as_ref().map(|c| c.last_checked);

    if let Some(cp) = update.checkpoint {
        book.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(series.to_string(), cp);
    }

    let status = if unresolved.is_empty() && !aborted && update.abandoned.is_empty() {
        SeriesStatus::Reconciled
    } else {
        SeriesStatus::Partial
    };

    Ok(SeriesReport {
        series: series.to_string(),
        status,
        missing_units: rec.missing.len(),
        written: backfill.as_ref().map_or(0, |b| b.written()),
        empty: backfill.as_ref().map_or(0, |b| b.empty()),
        failed: backfill.as_ref().map_or(0, |b| b.failed()),
        last_checked,
        unresolved,
        abandoned: update.abandoned,
    })
}

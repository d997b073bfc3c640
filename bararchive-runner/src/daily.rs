//! The `daily` task: fetch a date range for every series, skipping keys that exist.
//!
//! Unlike a reconciliation run this never reads or writes checkpoints. It is
//! meant for the scheduled end-of-day pull.

use crate::backfill::{BackfillDriver, BackfillOutcome, BackfillResult};
use crate::reconcile::Reconciler;
use crate::run::RunError;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Inclusive date range for the daily task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Exchange-local today, used to default the range.
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyReport {
    pub sessions: Vec<NaiveDate>,
    pub results: Vec<BackfillResult>,
    /// Units whose key already existed.
    pub skipped: usize,
    pub cancelled: bool,
}

impl DailyReport {
    pub fn written(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, BackfillOutcome::Failed(_)))
            .count()
    }
}

/// Fetch and write every expected partition in the range unless it already exists.
///
/// With no start or end the range is the latest complete session. With only a
/// start the range runs through the latest complete session.
pub fn fetch_range(
    reconciler: &Reconciler,
    driver: &BackfillDriver,
    series: &[String],
    range: DailyRange,
    cancel: Option<&AtomicBool>,
) -> Result<DailyReport, RunError> {
    let latest = reconciler.latest_complete(range.today);
    let end = match range.end.or(latest) {
        Some(end) => end,
        None => {
            info!(today = %range.today, "no complete session yet, nothing to fetch");
            return Ok(DailyReport::default());
        }
    };
    let start = range.start.unwrap_or(end);

    let sessions = reconciler.calendar().sessions(start, end)?;
    info!(
        %start,
        %end,
        sessions = sessions.len(),
        series = series.len(),
        "daily fetch"
    );

    let mut report = DailyReport {
        sessions: sessions.iter().map(|s| s.date).collect(),
        ..Default::default()
    };

    'outer: for session in &sessions {
        for name in series {
            for coord in reconciler.expected_units(name, session) {
                if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                    report.cancelled = true;
                    break 'outer;
                }
                let key = driver.layout().key(&coord);
                match driver.store().exists(&key) {
                    Ok(true) => {
                        debug!(%key, "skipped");
                        report.skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!(%key, error = %e, "existence check failed");
                        report.results.push(BackfillResult {
                            coordinate: coord,
                            outcome: BackfillOutcome::Failed(e.to_string()),
                            requested: false,
                        });
                        continue;
                    }
                }
                report.results.push(driver.write_unit(&coord)?);
            }
        }
    }

    info!(
        written = report.written(),
        skipped = report.skipped,
        failed = report.failed(),
        cancelled = report.cancelled,
        "daily fetch complete"
    );
    Ok(report)
}

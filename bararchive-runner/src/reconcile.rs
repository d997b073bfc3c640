//! Reconciliation engine: expected coverage versus the partitions in storage.
//!
//! For one series, expected coverage is every session from the checkpoint's
//! lower bound through the latest complete session, plus every date the
//! checkpoint still carries as unresolved. Whatever of that is not in the
//! inventory becomes an ordered list of missing units. After backfill the
//! engine folds the per-unit outcomes into the next checkpoint; it is the only
//! place checkpoints are mutated.

use crate::backfill::{BackfillOutcome, BackfillResult};
use bararchive_core::calendar::{CalendarError, TradingCalendar, TradingSession};
use bararchive_core::checkpoint::Checkpoint;
use bararchive_core::domain::{Granularity, HourlyWindow, PartitionCoordinate};
use bararchive_core::inventory::Inventory;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingReason {
    /// Inside the newly evaluated window and never written.
    NeverFetched,
    /// Carried forward from an earlier run's unresolved set.
    CarriedOverUnresolved,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReason::NeverFetched => write!(f, "never fetched"),
            MissingReason::CarriedOverUnresolved => write!(f, "carried over"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingUnit {
    pub coordinate: PartitionCoordinate,
    pub reason: MissingReason,
}

/// Checkpoint produced by folding backfill outcomes into a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckpointUpdate {
    /// `None` leaves the series without a stored checkpoint.
    pub checkpoint: Option<Checkpoint>,
    pub resolved: Vec<NaiveDate>,
    /// Dates dropped after reaching the attempt cap.
    pub abandoned: Vec<NaiveDate>,
}

/// Outcome of reconciling one series, before backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub series: String,
    pub previous: Option<Checkpoint>,
    pub lower_bound: NaiveDate,
    pub latest_complete: Option<NaiveDate>,
    /// Number of dates expected, new window plus carried over.
    pub expected_dates: usize,
    /// Ascending by date, then hour.
    pub missing: Vec<MissingUnit>,
}

impl Reconciliation {
    /// Distinct dates with at least one missing unit, ascending.
    pub fn missing_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.missing.iter().map(|u| u.coordinate.date).collect();
        dates.dedup();
        dates
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    fn previous_attempts(&self, date: NaiveDate) -> u32 {
        self.previous.as_ref().map_or(0, |c| c.attempts(date))
    }

    fn was_unresolved(&self, date: NaiveDate) -> bool {
        self.previous
            .as_ref()
            .is_some_and(|c| c.unresolved.contains_key(&date))
    }

    /// Date the checkpoint advances to when the run covered the whole window.
    fn advanced_last_checked(&self) -> Option<NaiveDate> {
        let previous = self.previous.as_ref().map(|c| c.last_checked);
        match (previous, self.latest_complete) {
            (Some(p), Some(l)) => Some(p.max(l)),
            (p, l) => p.or(l),
        }
    }

    /// Fold backfill outcomes into the next checkpoint.
    ///
    /// `completed` is false when backfill stopped before attempting every
    /// unit. In that case `last_checked` does not advance, so the unattempted
    /// part of the window is evaluated again next run, and only dates that
    /// were actually attempted (or were already unresolved) are carried.
    pub fn finalize(
        &self,
        results: &[BackfillResult],
        completed: bool,
        max_attempts: Option<u32>,
    ) -> CheckpointUpdate {
        let outcomes: HashMap<&PartitionCoordinate, &BackfillResult> =
            results.iter().map(|r| (&r.coordinate, r)).collect();

        let mut by_date: BTreeMap<NaiveDate, Vec<&MissingUnit>> = BTreeMap::new();
        for unit in &self.missing {
            by_date.entry(unit.coordinate.date).or_default().push(unit);
        }

        let mut unresolved = BTreeMap::new();
        let mut resolved = Vec::new();
        let mut abandoned = Vec::new();

        for (date, units) in by_date {
            let results: Vec<Option<&&BackfillResult>> =
                units.iter().map(|u| outcomes.get(&u.coordinate)).collect();
            let all_written = results
                .iter()
                .all(|r| r.is_some_and(|r| matches!(r.outcome, BackfillOutcome::Written { .. })));
            if all_written {
                resolved.push(date);
                continue;
            }

            let any_failed_attempt = results.iter().flatten().any(|r| {
                !matches!(r.outcome, BackfillOutcome::Written { .. })
            });
            let counted_attempt = results
                .iter()
                .flatten()
                .any(|r| r.requested && !matches!(r.outcome, BackfillOutcome::Written { .. }));

            if !any_failed_attempt && !completed && !self.was_unresolved(date) {
                // Not (fully) attempted and not yet known: the next run finds it again
                continue;
            }

            let attempts = self.previous_attempts(date) + u32::from(counted_attempt);
            if let Some(cap) = max_attempts {
                if attempts >= cap {
                    warn!(
                        series = %self.series,
                        %date,
                        attempts,
                        "giving up on date after reaching the attempt cap"
                    );
                    abandoned.push(date);
                    continue;
                }
            }
            unresolved.insert(date, attempts);
        }

        let last_checked = if completed {
            self.advanced_last_checked()
        } else {
            self.previous.as_ref().map(|c| c.last_checked)
        };
        // A first run that stopped early still has to remember what it tried.
        let last_checked = last_checked.or_else(|| {
            (!unresolved.is_empty())
                .then(|| self.lower_bound.pred_opt())
                .flatten()
        });

        CheckpointUpdate {
            checkpoint: last_checked.map(|last_checked| Checkpoint {
                last_checked,
                unresolved,
            }),
            resolved,
            abandoned,
        }
    }

    /// Checkpoint for a run that reconciles without fetching: every missing
    /// date is carried with its attempt count unchanged.
    pub fn report_only(&self) -> CheckpointUpdate {
        let unresolved: BTreeMap<NaiveDate, u32> = self
            .missing_dates()
            .into_iter()
            .map(|d| (d, self.previous_attempts(d)))
            .collect();
        let last_checked = self.advanced_last_checked().or_else(|| {
            (!unresolved.is_empty())
                .then(|| self.lower_bound.pred_opt())
                .flatten()
        });
        CheckpointUpdate {
            checkpoint: last_checked.map(|last_checked| Checkpoint {
                last_checked,
                unresolved,
            }),
            resolved: Vec::new(),
            abandoned: Vec::new(),
        }
    }
}

/// Computes expected coverage and missing units for a series.
#[derive(Clone)]
pub struct Reconciler {
    calendar: Arc<dyn TradingCalendar>,
    granularity: Granularity,
    hourly: HourlyWindow,
    epoch: NaiveDate,
}

impl Reconciler {
    pub fn new(
        calendar: Arc<dyn TradingCalendar>,
        granularity: Granularity,
        hourly: HourlyWindow,
        epoch: NaiveDate,
    ) -> Self {
        Self {
            calendar,
            granularity,
            hourly,
            epoch,
        }
    }

    pub fn calendar(&self) -> &dyn TradingCalendar {
        self.calendar.as_ref()
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn hourly(&self) -> HourlyWindow {
        self.hourly
    }

    /// Most recent session strictly before `today`, no earlier than the epoch.
    pub fn latest_complete(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.calendar
            .latest_session_before(today, self.epoch)
            .map(|s| s.date)
    }

    /// Partition coordinates a session must have.
    pub fn expected_units(&self, series: &str, session: &TradingSession) -> Vec<PartitionCoordinate> {
        match self.granularity {
            Granularity::Daily => vec![PartitionCoordinate::daily(series, session.date)],
            Granularity::Hourly => self
                .hourly
                .hours(session.early_close)
                .map(|h| PartitionCoordinate::hourly(series, session.date, h))
                .collect(),
        }
    }

    pub fn reconcile(
        &self,
        series: &str,
        checkpoint: Option<&Checkpoint>,
        inventory: &Inventory,
        latest_complete: Option<NaiveDate>,
    ) -> Result<Reconciliation, CalendarError> {
        let lower_bound = match checkpoint {
            Some(c) => c.last_checked.succ_opt().unwrap_or(c.last_checked),
            None => inventory.earliest_date().unwrap_or(self.epoch),
        };

        let mut expected: BTreeMap<NaiveDate, (TradingSession, MissingReason)> = BTreeMap::new();
        if let Some(latest) = latest_complete.filter(|l| lower_bound <= *l) {
            for session in self.calendar.sessions(lower_bound, latest)? {
                expected.insert(session.date, (session, MissingReason::NeverFetched));
            }
        }
        if let Some(c) = checkpoint {
            for &date in c.unresolved.keys() {
                let session = self
                    .calendar
                    .session_on(date)
                    .unwrap_or_else(|| TradingSession::regular(date));
                expected.insert(date, (session, MissingReason::CarriedOverUnresolved));
            }
        }
        // Truncated objects behind the checkpoint are outside the new window
        if let Some(latest) = latest_complete {
            for (coord, size) in &inventory.undersized {
                if coord.date > latest || expected.contains_key(&coord.date) {
                    continue;
                }
                if let Some(session) = self.calendar.session_on(coord.date) {
                    debug!(series, date = %coord.date, size, "refetching undersized partition");
                    expected.insert(coord.date, (session, MissingReason::CarriedOverUnresolved));
                }
            }
        }

        let missing: Vec<MissingUnit> = expected
            .values()
            .flat_map(|(session, reason)| {
                self.expected_units(series, session)
                    .into_iter()
                    .filter(|coord| !inventory.contains(coord))
                    .map(|coordinate| MissingUnit {
                        coordinate,
                        reason: *reason,
                    })
            })
            .collect();

        debug!(
            series,
            %lower_bound,
            latest = ?latest_complete,
            expected = expected.len(),
            missing = missing.len(),
            "reconciled"
        );

        Ok(Reconciliation {
            series: series.to_string(),
            previous: checkpoint.cloned(),
            lower_bound,
            latest_complete,
            expected_dates: expected.len(),
            missing,
        })
    }
}

//! Market calendars: which dates a market was open.
//!
//! The holiday rules are computed, not fetched. Ad-hoc closures the rules
//! cannot know about (national days of mourning, weather closures) come from a
//! [`HolidaySchedule`] loaded once at startup and never refreshed during a run.

pub mod exchange;
mod rules;

pub use exchange::{calendar_for_market, ExchangeCalendar, SUPPORTED_MARKETS};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// A date on which the market was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradingSession {
    pub date: NaiveDate,
    /// Session closed early (half day).
    pub early_close: bool,
}

impl TradingSession {
    pub fn regular(date: NaiveDate) -> Self {
        Self {
            date,
            early_close: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("invalid session range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    #[error("no calendar for market '{0}'")]
    UnknownMarket(String),

    #[error("holiday schedule unavailable: {0}")]
    Unavailable(String),
}

/// Source of trading sessions for one market.
pub trait TradingCalendar: Send + Sync {
    /// Market identifier this calendar answers for (e.g. `XNYS`).
    fn market(&self) -> &str;

    /// The session on `date`, if the market was open.
    fn session_on(&self, date: NaiveDate) -> Option<TradingSession>;

    /// Ordered sessions in `[from, to]`.
    fn sessions(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TradingSession>, CalendarError> {
        if from > to {
            return Err(CalendarError::InvalidRange { from, to });
        }
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .filter_map(|d| self.session_on(d))
            .collect())
    }

    /// Most recent session strictly before `today`, searching no earlier than `floor`.
    ///
    /// Today's session is never returned: it is still in progress.
    fn latest_session_before(&self, today: NaiveDate, floor: NaiveDate) -> Option<TradingSession> {
        let mut day = today.pred_opt()?;
        while day >= floor {
            if let Some(session) = self.session_on(day) {
                return Some(session);
            }
            day = day.pred_opt()?;
        }
        None
    }
}

/// Closures and half days layered on top of the computed rules.
///
/// ```toml
/// closures = ["2025-01-09"]
/// early_closes = ["2025-12-24"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolidaySchedule {
    #[serde(default)]
    pub closures: Vec<NaiveDate>,
    #[serde(default)]
    pub early_closes: Vec<NaiveDate>,
}

impl HolidaySchedule {
    /// Load a schedule from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CalendarError::Unavailable(format!("read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a schedule from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, CalendarError> {
        toml::from_str(content)
            .map_err(|e| CalendarError::Unavailable(format!("parse holiday schedule: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_parses_quoted_dates() {
        let schedule = HolidaySchedule::from_toml(
            r#"
closures = ["2024-01-05", "2025-01-09"]
early_closes = ["2024-12-24"]
"#,
        )
        .unwrap();
        assert_eq!(schedule.closures.len(), 2);
        assert_eq!(
            schedule.early_closes,
            vec![NaiveDate::from_ymd_opt(2024, 12, 24).unwrap()]
        );
    }

    #[test]
    fn empty_schedule_is_valid() {
        assert_eq!(HolidaySchedule::from_toml("").unwrap(), HolidaySchedule::default());
    }

    #[test]
    fn malformed_schedule_is_unavailable() {
        let err = HolidaySchedule::from_toml("closures = [\"not-a-date\"]").unwrap_err();
        assert!(matches!(err, CalendarError::Unavailable(_)));
    }

    #[test]
    fn missing_schedule_file_is_unavailable() {
        let err = HolidaySchedule::from_file(Path::new("/nonexistent/holidays.toml")).unwrap_err();
        assert!(matches!(err, CalendarError::Unavailable(_)));
    }
}

//! Rule-based calendar for US equity exchanges.

use super::rules::{is_weekday, us_equity_year, YearSchedule};
use super::{CalendarError, HolidaySchedule, TradingCalendar, TradingSession};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Market identifiers that resolve to the US equity calendar.
pub const SUPPORTED_MARKETS: &[&str] = &["XNYS", "NYSE", "XNAS", "NASDAQ"];

/// NYSE/Nasdaq calendar: computed holiday rules plus an optional schedule of
/// extra closures and half days.
///
/// Year schedules are computed on first use and cached.
#[derive(Debug)]
pub struct ExchangeCalendar {
    market: String,
    schedule: HolidaySchedule,
    years: RwLock<HashMap<i32, Arc<YearSchedule>>>,
}

impl ExchangeCalendar {
    pub fn new(market: impl Into<String>, schedule: HolidaySchedule) -> Self {
        Self {
            market: market.into(),
            schedule,
            years: RwLock::new(HashMap::new()),
        }
    }

    fn year(&self, year: i32) -> Arc<YearSchedule> {
        if let Some(cached) = self.years.read().unwrap().get(&year) {
            return Arc::clone(cached);
        }

        let mut computed = us_equity_year(year);
        for d in self.schedule.closures.iter().filter(|d| d.year() == year) {
            computed.holidays.insert(*d);
            computed.early_closes.remove(d);
        }
        for d in self.schedule.early_closes.iter().filter(|d| d.year() == year) {
            if !computed.holidays.contains(d) {
                computed.early_closes.insert(*d);
            }
        }

        let computed = Arc::new(computed);
        self.years
            .write()
            .unwrap()
            .entry(year)
            .or_insert_with(|| Arc::clone(&computed));
        computed
    }
}

impl TradingCalendar for ExchangeCalendar {
    fn market(&self) -> &str {
        &self.market
    }

    fn session_on(&self, date: NaiveDate) -> Option<TradingSession> {
        if !is_weekday(date) {
            return None;
        }
        let year = self.year(date.year());
        if year.holidays.contains(&date) {
            return None;
        }
        Some(TradingSession {
            date,
            early_close: year.early_closes.contains(&date),
        })
    }
}

/// Calendar for a configured market identifier.
pub fn calendar_for_market(
    market: &str,
    schedule: HolidaySchedule,
) -> Result<ExchangeCalendar, CalendarError> {
    let normalized = market.trim().to_ascii_uppercase();
    if !SUPPORTED_MARKETS.contains(&normalized.as_str()) {
        return Err(CalendarError::UnknownMarket(market.to_string()));
    }
    Ok(ExchangeCalendar::new(normalized, schedule))
}

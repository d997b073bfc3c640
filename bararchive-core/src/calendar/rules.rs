//! US equity exchange holiday rules (NYSE / Nasdaq share the same schedule).

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// Closures and half days for one calendar year.
#[derive(Debug, Clone, Default)]
pub(crate) struct YearSchedule {
    pub holidays: BTreeSet<NaiveDate>,
    pub early_closes: BTreeSet<NaiveDate>,
}

/// One-off closures the annual rules do not produce.
const SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (2001, 9, 11),
    (2001, 9, 12),
    (2001, 9, 13),
    (2001, 9, 14),
    (2004, 6, 11),
    (2007, 1, 2),
    (2012, 10, 29),
    (2012, 10, 30),
    (2018, 12, 5),
    (2025, 1, 9),
];

pub(crate) fn us_equity_year(year: i32) -> YearSchedule {
    let mut holidays = BTreeSet::new();

    // New Year's Day: Sunday moves to Monday, Saturday is not observed
    let new_year = ymd(year, 1, 1);
    match new_year.weekday() {
        Weekday::Sat => {}
        Weekday::Sun => {
            holidays.insert(new_year + Duration::days(1));
        }
        _ => {
            holidays.insert(new_year);
        }
    }

    if year >= 1998 {
        holidays.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    }
    holidays.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    holidays.insert(easter_sunday(year) - Duration::days(2));
    holidays.insert(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        holidays.insert(observed(ymd(year, 6, 19)));
    }
    holidays.insert(observed(ymd(year, 7, 4)));
    holidays.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    let thanksgiving = nth_weekday(year, 11, Weekday::Thu, 4);
    holidays.extend(thanksgiving);
    holidays.insert(observed(ymd(year, 12, 25)));

    holidays.extend(
        SPECIAL_CLOSURES
            .iter()
            .filter(|(y, _, _)| *y == year)
            .map(|&(y, m, d)| ymd(y, m, d)),
    );

    let mut early_closes = BTreeSet::new();
    let is_open_weekday = |d: NaiveDate| is_weekday(d) && !holidays.contains(&d);

    if let Some(tg) = thanksgiving {
        early_closes.insert(tg + Duration::days(1));
    }
    let christmas_eve = ymd(year, 12, 24);
    if is_open_weekday(christmas_eve) {
        early_closes.insert(christmas_eve);
    }
    let july_3 = ymd(year, 7, 3);
    let july_4_midweek = matches!(
        ymd(year, 7, 4).weekday(),
        Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
    );
    if july_4_midweek && is_open_weekday(july_3) {
        early_closes.insert(july_3);
    }

    YearSchedule {
        holidays,
        early_closes,
    }
}

pub(crate) fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Saturday holidays are observed Friday, Sunday holidays Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    // Only called with fixed month/day pairs that exist in every year.
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        ymd(year + 1, 1, 1)
    } else {
        ymd(year, month + 1, 1)
    };
    let mut day = next_month_first - Duration::days(1);
    while day.weekday() != weekday {
        day -= Duration::days(1);
    }
    day
}

/// Gregorian Easter Sunday (anonymous Gregorian algorithm).
fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    ymd(year, month as u32, day as u32)
}

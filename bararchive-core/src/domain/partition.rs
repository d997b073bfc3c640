//! Partition coordinates and the Hive-style key layout.
//!
//! Layout: `{root}/ticker={SERIES}/year={YYYY}/month={MM}/day={DD}[/hour={HH}]`
//!
//! The key string is the object name itself (no file extension), so a key
//! produced by [`PartitionLayout::key`] must parse back to the same
//! coordinate through [`PartitionLayout::parse`].

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Storage granularity of the archive. Fixed for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Hourly,
}

impl Granularity {
    pub fn is_hourly(self) -> bool {
        matches!(self, Granularity::Hourly)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Hourly => write!(f, "hourly"),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "hourly" | "hour" => Ok(Granularity::Hourly),
            other => Err(format!("unknown granularity '{other}' (expected daily or hourly)")),
        }
    }
}

/// Exchange-local hours that make up one session under hourly partitioning.
///
/// `close_hour` and `early_close_hour` are exclusive: the default
/// 9..16 window yields partitions for hours 09 through 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyWindow {
    pub open_hour: u8,
    pub close_hour: u8,
    pub early_close_hour: u8,
}

impl Default for HourlyWindow {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 16,
            early_close_hour: 13,
        }
    }
}

impl HourlyWindow {
    /// Hours expected for a session.
    pub fn hours(&self, early_close: bool) -> Range<u8> {
        let end = if early_close {
            self.early_close_hour.min(self.close_hour)
        } else {
            self.close_hour
        };
        self.open_hour..end
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.close_hour > 24 {
            return Err(format!("close_hour {} is past midnight", self.close_hour));
        }
        if self.open_hour >= self.close_hour {
            return Err(format!(
                "open_hour {} must be before close_hour {}",
                self.open_hour, self.close_hour
            ));
        }
        if self.early_close_hour <= self.open_hour {
            return Err(format!(
                "early_close_hour {} must be after open_hour {}",
                self.early_close_hour, self.open_hour
            ));
        }
        Ok(())
    }
}

/// One unit of storage: a series on a date, optionally narrowed to an hour.
///
/// Ordering is series, then date, then hour, which is the order backfill
/// walks units in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionCoordinate {
    pub series: String,
    pub date: NaiveDate,
    pub hour: Option<u8>,
}

impl PartitionCoordinate {
    pub fn daily(series: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            series: series.into(),
            date,
            hour: None,
        }
    }

    pub fn hourly(series: impl Into<String>, date: NaiveDate, hour: u8) -> Self {
        Self {
            series: series.into(),
            date,
            hour: Some(hour),
        }
    }
}

impl fmt::Display for PartitionCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hour {
            Some(h) => write!(f, "{}@{}T{h:02}", self.series, self.date),
            None => write!(f, "{}@{}", self.series, self.date),
        }
    }
}

/// Why a key could not be read as a partition coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionKeyError {
    #[error("key is outside archive root: {0}")]
    OutsideRoot(String),

    #[error("expected '{expected}=' segment, found '{found}'")]
    MalformedSegment { expected: &'static str, found: String },

    #[error("not a calendar date: {0}")]
    InvalidDate(String),

    #[error("hour out of range: {0}")]
    InvalidHour(u32),

    #[error("unexpected trailing segments: {0}")]
    TrailingSegments(String),
}

/// Key builder/parser bound to an archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    root: String,
}

impl PartitionLayout {
    pub fn new(root: impl Into<String>) -> Self {
        let root: String = root.into();
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix under which every series directory lives: `{root}/`.
    pub fn root_prefix(&self) -> String {
        if self.root.is_empty() {
            String::new()
        } else {
            format!("{}/", self.root)
        }
    }

    /// Prefix for all partitions of one series: `{root}/ticker={SERIES}/`.
    ///
    /// The trailing slash keeps `ticker=AB/` from matching `ticker=ABC/`.
    pub fn series_prefix(&self, series: &str) -> String {
        format!("{}ticker={series}/", self.root_prefix())
    }

    /// Object key for a coordinate.
    pub fn key(&self, coord: &PartitionCoordinate) -> String {
        let mut key = format!(
            "{}year={:04}/month={:02}/day={:02}",
            self.series_prefix(&coord.series),
            coord.date.year(),
            coord.date.month(),
            coord.date.day()
        );
        if let Some(hour) = coord.hour {
            key.push_str(&format!("/hour={hour:02}"));
        }
        key
    }

    /// Parse an object key back into a coordinate.
    pub fn parse(&self, key: &str) -> Result<PartitionCoordinate, PartitionKeyError> {
        let rest = key
            .strip_prefix(&self.root_prefix())
            .ok_or_else(|| PartitionKeyError::OutsideRoot(key.to_string()))?;

        let mut segments = rest.split('/');

        let series = segment_value(segments.next(), "ticker")?;
        if series.is_empty() {
            return Err(PartitionKeyError::MalformedSegment {
                expected: "ticker",
                found: String::new(),
            });
        }

        let year = numeric_segment(segments.next(), "year", 4)?;
        let month = numeric_segment(segments.next(), "month", 2)?;
        let day = numeric_segment(segments.next(), "day", 2)?;

        let hour = match segments.next() {
            None => None,
            Some(seg) => {
                let h = numeric_segment(Some(seg), "hour", 2)?;
                if h > 23 {
                    return Err(PartitionKeyError::InvalidHour(h));
                }
                Some(h as u8)
            }
        };

        let trailing: Vec<&str> = segments.collect();
        if !trailing.is_empty() {
            return Err(PartitionKeyError::TrailingSegments(trailing.join("/")));
        }

        let date = NaiveDate::from_ymd_opt(year as i32, month, day)
            .ok_or_else(|| PartitionKeyError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))?;

        Ok(PartitionCoordinate {
            series: series.to_string(),
            date,
            hour,
        })
    }

    /// Series name of any key under `{root}/ticker={SERIES}/...`.
    pub fn series_of_key<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(&self.root_prefix())?;
        let (first, _) = rest.split_once('/')?;
        first.strip_prefix("ticker=").filter(|s| !s.is_empty())
    }
}

fn segment_value<'a>(
    segment: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, PartitionKeyError> {
    let seg = segment.unwrap_or_default();
    seg.strip_prefix(name)
        .and_then(|s| s.strip_prefix('='))
        .ok_or_else(|| PartitionKeyError::MalformedSegment {
            expected: name,
            found: seg.to_string(),
        })
}

fn numeric_segment(
    segment: Option<&str>,
    name: &'static str,
    width: usize,
) -> Result<u32, PartitionKeyError> {
    let value = segment_value(segment, name)?;
    if value.len() != width || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PartitionKeyError::MalformedSegment {
            expected: name,
            found: segment.unwrap_or_default().to_string(),
        });
    }
    value
        .parse()
        .map_err(|_| PartitionKeyError::MalformedSegment {
            expected: name,
            found: value.to_string(),
        })
}

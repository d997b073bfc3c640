//! Per-series checkpoints and the CSV backfill report they persist to.
//!
//! The report is read once at run start and rewritten whole at run end.
//! Columns: `ticker,last_checked,missing_count,missing_dates,attempts`.
//! `missing_dates` and `attempts` are `", "`-joined lists aligned by position;
//! `attempts` may be absent in reports written by older tools.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const LIST_SEPARATOR: &str = ", ";

/// Durable reconciliation state for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Latest session whose expected coverage has been evaluated.
    pub last_checked: NaiveDate,
    /// Dates expected but still absent, with the number of failed fetch attempts.
    pub unresolved: BTreeMap<NaiveDate, u32>,
}

impl Checkpoint {
    pub fn new(last_checked: NaiveDate) -> Self {
        Self {
            last_checked,
            unresolved: BTreeMap::new(),
        }
    }

    pub fn missing_count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn attempts(&self, date: NaiveDate) -> u32 {
        self.unresolved.get(&date).copied().unwrap_or(0)
    }
}

/// All checkpoints, keyed by series.
pub type CheckpointBook = BTreeMap<String, Checkpoint>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("corrupt checkpoint record {row}: {reason}")]
    Corrupt { row: usize, reason: String },
}

/// Whole-collection checkpoint persistence.
pub trait CheckpointStore: Send + Sync {
    /// Load every checkpoint. A store that has never been written loads empty.
    fn load(&self) -> Result<CheckpointBook, CheckpointError>;

    /// Replace the stored collection.
    fn save(&self, book: &CheckpointBook) -> Result<(), CheckpointError>;
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(alias = "series")]
    ticker: String,
    last_checked: String,
    #[serde(default)]
    missing_count: Option<usize>,
    #[serde(default)]
    missing_dates: String,
    #[serde(default)]
    attempts: Option<String>,
}

/// Checkpoints stored as the CSV backfill report.
#[derive(Debug, Clone)]
pub struct CsvCheckpointStore {
    path: PathBuf,
}

impl CsvCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for CsvCheckpointStore {
    fn load(&self) -> Result<CheckpointBook, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint report yet");
                return Ok(CheckpointBook::new());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        parse_report(&content)
    }

    fn save(&self, book: &CheckpointBook) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let bytes = render_report(book)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.io_err(e)
        })
    }
}

/// Parse report CSV text into a checkpoint book.
pub fn parse_report(content: &str) -> Result<CheckpointBook, CheckpointError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut book = CheckpointBook::new();
    for (idx, record) in reader.deserialize::<ReportRow>().enumerate() {
        let row = idx + 1;
        let record = record?;
        let corrupt = |reason: String| CheckpointError::Corrupt { row, reason };

        if record.ticker.is_empty() {
            return Err(corrupt("empty ticker".into()));
        }
        let last_checked = parse_date(&record.last_checked)
            .ok_or_else(|| corrupt(format!("bad last_checked '{}'", record.last_checked)))?;

        let dates = split_list(&record.missing_dates)
            .map(|s| parse_date(s).ok_or_else(|| corrupt(format!("bad missing date '{s}'"))))
            .collect::<Result<Vec<_>, _>>()?;

        let attempts = match record.attempts.as_deref().map(str::trim) {
            None | Some("") => vec![0; dates.len()],
            Some(list) => split_list(list)
                .map(|s| {
                    s.parse::<u32>()
                        .map_err(|_| corrupt(format!("bad attempt count '{s}'")))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        if attempts.len() != dates.len() {
            return Err(corrupt(format!(
                "{} attempt counts for {} missing dates",
                attempts.len(),
                dates.len()
            )));
        }

        if let Some(count) = record.missing_count {
            if count != dates.len() {
                warn!(ticker = %record.ticker, count, listed = dates.len(), "missing_count disagrees with missing_dates; using the dates");
            }
        }

        let checkpoint = Checkpoint {
            last_checked,
            unresolved: dates.into_iter().zip(attempts).collect(),
        };
        if book.insert(record.ticker.clone(), checkpoint).is_some() {
            return Err(corrupt(format!("duplicate ticker '{}'", record.ticker)));
        }
    }
    Ok(book)
}

/// Render a checkpoint book as report CSV, most-missing series first.
pub fn render_report(book: &CheckpointBook) -> Result<Vec<u8>, CheckpointError> {
    let mut rows: Vec<(&String, &Checkpoint)> = book.iter().collect();
    rows.sort_by(|a, b| {
        b.1.missing_count()
            .cmp(&a.1.missing_count())
            .then_with(|| a.0.cmp(b.0))
    });

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "ticker",
        "last_checked",
        "missing_count",
        "missing_dates",
        "attempts",
    ])?;
    for (series, cp) in rows {
        let dates = cp
            .unresolved
            .keys()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        let attempts = cp
            .unresolved
            .values()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        wtr.write_record([
            series.as_str(),
            &cp.last_checked.format("%Y-%m-%d").to_string(),
            &cp.missing_count().to_string(),
            &dates,
            &attempts,
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| CheckpointError::Csv(csv::Error::from(e.into_error())))
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

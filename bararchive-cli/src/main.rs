//! Bar archive CLI: setup, backfill, daily and live tasks.
//!
//! Commands:
//! - `setup`: refresh ticker metadata, then reconcile and backfill every series
//! - `backfill`: reconcile every series against the calendar and fill gaps
//! - `daily`: fetch a date range for every series, skipping existing partitions
//! - `live`: recognized, not supported in this build

use anyhow::{bail, Context, Result};
use bararchive_core::calendar::{calendar_for_market, HolidaySchedule, TradingCalendar};
use bararchive_core::checkpoint::CsvCheckpointStore;
use bararchive_core::domain::Granularity;
use bararchive_core::inventory::InventoryScanner;
use bararchive_core::provider::polygon::PolygonConfig;
use bararchive_core::provider::{CircuitBreaker, PolygonProvider};
use bararchive_core::storage::LocalObjectStore;
use bararchive_runner::{
    execute_run, fetch_range, refresh_metadata, resolve_universe, ArchiveConfig, BackfillDriver,
    DailyRange, LogProgress, MetadataKeys, Reconciler, RunContext, RunMode, RunOptions,
    RunReport, SeriesStatus,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bararchive",
    about = "Bar archive gap reconciliation and backfill"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true, env = "BARARCHIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh ticker listing and details, then reconcile and backfill.
    Setup {
        /// Only refresh metadata.
        #[arg(long, default_value_t = false)]
        skip_backfill: bool,

        /// Worker threads. Overrides the config file.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Reconcile every series and backfill missing partitions.
    Backfill {
        /// Series to process (comma separated). Defaults to config, then discovery.
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// Write the gap report without fetching.
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// daily or hourly. Overrides the config file.
        #[arg(long)]
        granularity: Option<Granularity>,

        /// Worker threads. Overrides the config file.
        #[arg(long)]
        workers: Option<usize>,

        /// Treat this date (YYYY-MM-DD) as today. Defaults to today in the market timezone.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Fetch a date range for every series, skipping partitions that exist.
    Daily {
        /// Series to process (comma separated).
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// First date (YYYY-MM-DD). Defaults to the end date.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date (YYYY-MM-DD). Defaults to the latest complete session.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// daily or hourly. Overrides the config file.
        #[arg(long)]
        granularity: Option<Granularity>,
    },
    /// Streaming ingestion (not supported in this build).
    Live,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ArchiveConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ArchiveConfig::default(),
    };

    match cli.command {
        Commands::Setup {
            skip_backfill,
            workers,
        } => {
            if let Some(w) = workers {
                config.workers = w;
            }
            run_setup(config, skip_backfill)
        }
        Commands::Backfill {
            tickers,
            report_only,
            granularity,
            workers,
            as_of,
        } => {
            if let Some(g) = granularity {
                config.granularity = g;
            }
            if let Some(w) = workers {
                config.workers = w;
            }
            let mode = if report_only {
                RunMode::ReportOnly
            } else {
                RunMode::Backfill
            };
            run_backfill(config, &tickers, mode, as_of)
        }
        Commands::Daily {
            tickers,
            start,
            end,
            granularity,
        } => {
            if let Some(g) = granularity {
                config.granularity = g;
            }
            run_daily(config, &tickers, start, end)
        }
        Commands::Live => {
            bail!("the live task (streaming ingestion) is not part of this build")
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bararchive=debug" } else { "bararchive=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Collaborators built from one validated config.
struct Archive {
    config: ArchiveConfig,
    store: Arc<LocalObjectStore>,
    provider: Arc<PolygonProvider>,
    ctx: RunContext,
    today: NaiveDate,
}

impl Archive {
    fn open(config: ArchiveConfig) -> Result<Self> {
        config.validate()?;
        let tz = config.market_tz()?;
        let today = Utc::now().with_timezone(&tz).date_naive();

        let schedule = match &config.holiday_schedule {
            Some(path) => HolidaySchedule::from_file(path)
                .with_context(|| format!("loading holiday schedule {}", path.display()))?,
            None => HolidaySchedule::default(),
        };
        let calendar: Arc<dyn TradingCalendar> = Arc::new(
            calendar_for_market(&config.market, schedule).context("building trading calendar")?,
        );

        let store = Arc::new(LocalObjectStore::new(&config.storage_dir));
        let polygon = PolygonConfig {
            timeout: config.fetch.timeout(),
            retry: config.fetch.retry_policy(),
            adjusted: config.fetch.adjusted,
            ..PolygonConfig::new("")
        };
        let provider = Arc::new(
            PolygonProvider::from_env(polygon, Arc::new(CircuitBreaker::default_provider()))
                .context("configuring upstream provider")?,
        );

        let layout = config.layout();
        let ctx = RunContext {
            scanner: InventoryScanner::new(
                store.clone(),
                layout.clone(),
                config.granularity,
                config.min_partition_bytes,
            ),
            reconciler: Reconciler::new(calendar, config.granularity, config.hourly, config.archive_epoch),
            driver: BackfillDriver::new(
                provider.clone(),
                store.clone(),
                layout,
                tz,
                config.fetch.resolution(),
            ),
        };

        info!(
            storage = %config.storage_dir.display(),
            root = %config.archive_root,
            market = %config.market,
            granularity = %config.granularity,
            %today,
            "archive opened"
        );
        Ok(Self {
            config,
            store,
            provider,
            ctx,
            today,
        })
    }

    fn universe(&self, cli: &[String]) -> Result<Vec<String>> {
        let universe = resolve_universe(
            Some(cli),
            self.config.tickers.as_deref(),
            &self.ctx.scanner,
            self.store.as_ref(),
            &self.config.tickers_metadata_key,
        )
        .context("resolving series")?;
        info!(series = universe.series.len(), source = ?universe.source, "series resolved");
        Ok(universe.series)
    }

    fn run(&self, series: &[String], mode: RunMode, today: NaiveDate) -> Result<RunReport> {
        let checkpoints = CsvCheckpointStore::new(&self.config.checkpoint_path);
        let opts = RunOptions {
            mode,
            today,
            workers: self.config.workers,
            max_unit_attempts: self.config.max_unit_attempts,
        };
        let report = execute_run(&self.ctx, &checkpoints, series, &opts, &LogProgress, None)?;
        print_summary(&report);
        Ok(report)
    }
}

fn run_setup(config: ArchiveConfig, skip_backfill: bool) -> Result<()> {
    let archive = Archive::open(config)?;
    let keys = MetadataKeys {
        tickers: archive.config.tickers_metadata_key.clone(),
        details: archive.config.details_metadata_key.clone(),
    };
    let report = refresh_metadata(
        archive.provider.as_ref(),
        archive.store.as_ref(),
        &archive.config.setup,
        &keys,
        None,
    )
    .context("refreshing ticker metadata")?;
    println!(
        "Metadata: {} tickers, {} details ({} failed), {} quarantined field names",
        report.tickers,
        report.details,
        report.detail_failures,
        report.quarantined.len()
    );

    if skip_backfill {
        return Ok(());
    }
    let series = archive.universe(&[])?;
    archive.run(&series, RunMode::Backfill, archive.today)?;
    Ok(())
}

fn run_backfill(
    config: ArchiveConfig,
    tickers: &[String],
    mode: RunMode,
    as_of: Option<NaiveDate>,
) -> Result<()> {
    let archive = Archive::open(config)?;
    let series = archive.universe(tickers)?;
    if series.is_empty() {
        println!("No series to process.");
        return Ok(());
    }
    archive.run(&series, mode, as_of.unwrap_or(archive.today))?;
    Ok(())
}

fn run_daily(
    config: ArchiveConfig,
    tickers: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let archive = Archive::open(config)?;
    let series = archive.universe(tickers)?;
    if series.is_empty() {
        println!("No series to process.");
        return Ok(());
    }
    let range = DailyRange {
        start,
        end,
        today: archive.today,
    };
    let report = fetch_range(&archive.ctx.reconciler, &archive.ctx.driver, &series, range, None)?;
    println!(
        "Daily: {} sessions, {} written, {} skipped, {} failed",
        report.sessions.len(),
        report.written(),
        report.skipped,
        report.failed()
    );
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    match report.latest_complete {
        Some(d) => println!("Latest complete session: {d}"),
        None => println!("Latest complete session: none"),
    }
    println!(
        "Series: {} reconciled, {} partial, {} scan failed, {} skipped",
        report.count(|s| *s == SeriesStatus::Reconciled),
        report.count(|s| *s == SeriesStatus::Partial),
        report.count(|s| matches!(s, SeriesStatus::ScanFailed(_))),
        report.count(|s| *s == SeriesStatus::Skipped),
    );
    println!(
        "Units:  {} written, {} failed",
        report.total_written(),
        report.total_failed()
    );
    for s in report.series.iter().filter(|s| !s.unresolved.is_empty() || !s.abandoned.is_empty()) {
        println!(
            "  {:<8} unresolved {:>3}  abandoned {:>3}",
            s.series,
            s.unresolved.len(),
            s.abandoned.len()
        );
    }
}

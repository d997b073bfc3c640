//! Bar archive runner: reconciliation, backfill, run orchestration.
//!
//! This crate builds on `bararchive-core` to provide:
//! - TOML configuration
//! - Gap detection against the trading calendar and the stored inventory
//! - Backfill of missing partitions with per-unit failure isolation
//! - Run orchestration over a worker pool with a single checkpoint save
//! - The `daily` range fetch and the `setup` metadata refresh

pub mod backfill;
pub mod config;
pub mod daily;
pub mod reconcile;
pub mod run;
pub mod setup;
pub mod universe;

pub use backfill::{BackfillDriver, BackfillOutcome, BackfillReport, BackfillResult};
pub use config::{ArchiveConfig, ConfigError, FetchConfig, SetupConfig};
pub use daily::{fetch_range, DailyRange, DailyReport};
pub use reconcile::{
    CheckpointUpdate, MissingReason, MissingUnit, Reconciler, Reconciliation,
};
pub use run::{
    execute_run, BackfillProgress, LogProgress, RunContext, RunError, RunMode, RunOptions,
    RunReport, SeriesReport, SeriesStatus,
};
pub use setup::{refresh_metadata, MetadataKeys, SetupError, SetupReport};
pub use universe::{resolve_universe, Universe, UniverseSource};

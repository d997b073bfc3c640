//! Bar Archive Core: the partitioned archive model and its collaborators.
//!
//! This crate contains everything the reconciliation engine needs to know
//! about the outside world:
//! - Domain types (bars, partition coordinates and keys, ticker reference data)
//! - Market calendars with computed US holiday rules
//! - Object storage trait with local-filesystem and in-memory stores
//! - Partition inventory scanner
//! - Checkpoints and the CSV backfill report
//! - Parquet codec for partition objects
//! - Upstream provider trait, Polygon client, circuit breaker, retry policy

pub mod calendar;
pub mod checkpoint;
pub mod codec;
pub mod domain;
pub mod inventory;
pub mod provider;
pub mod retry;
pub mod storage;

//! Partition inventory: what the archive actually holds for a series.
//!
//! Storage is the source of truth. The inventory is rebuilt from a listing on
//! every run and never cached across runs.

use crate::domain::{Granularity, PartitionCoordinate, PartitionLayout};
use crate::storage::{ObjectStore, StorageError};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A listed key that is not a partition of this archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAnomaly {
    pub key: String,
    pub reason: String,
}

/// Partitions found for one series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub series: String,
    /// Partitions at or above the size threshold.
    pub present: BTreeSet<PartitionCoordinate>,
    /// Partitions below the size threshold; treated as absent.
    pub undersized: Vec<(PartitionCoordinate, u64)>,
    pub anomalies: Vec<KeyAnomaly>,
}

impl Inventory {
    pub fn empty(series: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            ..Default::default()
        }
    }

    pub fn contains(&self, coord: &PartitionCoordinate) -> bool {
        self.present.contains(coord)
    }

    /// Distinct dates with at least one present partition.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.present.iter().map(|c| c.date).collect()
    }

    /// Earliest date the archive has any object for, including undersized ones.
    pub fn earliest_date(&self) -> Option<NaiveDate> {
        let present = self.present.iter().next().map(|c| c.date);
        let undersized = self.undersized.iter().map(|(c, _)| c.date).min();
        match (present, undersized) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}

/// Builds inventories from storage listings.
pub struct InventoryScanner {
    store: Arc<dyn ObjectStore>,
    layout: PartitionLayout,
    granularity: Granularity,
    min_partition_bytes: u64,
}

impl InventoryScanner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        layout: PartitionLayout,
        granularity: Granularity,
        min_partition_bytes: u64,
    ) -> Self {
        Self {
            store,
            layout,
            granularity,
            min_partition_bytes,
        }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// List and parse every partition under the series prefix.
    ///
    /// Keys that do not parse, belong to another series, or have the wrong
    /// granularity are recorded as anomalies and otherwise ignored.
    pub fn scan(&self, series: &str) -> Result<Inventory, StorageError> {
        let prefix = self.layout.series_prefix(series);
        let entries = self.store.list(&prefix)?;
        let mut inventory = Inventory::empty(series);

        for entry in entries {
            let coord = match self.layout.parse(&entry.key) {
                Ok(c) => c,
                Err(e) => {
                    warn!(series, key = %entry.key, error = %e, "ignoring unparseable key");
                    inventory.anomalies.push(KeyAnomaly {
                        key: entry.key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if coord.series != series {
                warn!(series, key = %entry.key, owner = %coord.series, "ignoring key of another series");
                inventory.anomalies.push(KeyAnomaly {
                    key: entry.key,
                    reason: format!("belongs to series '{}'", coord.series),
                });
                continue;
            }

            if coord.hour.is_some() != self.granularity.is_hourly() {
                warn!(series, key = %entry.key, granularity = %self.granularity, "ignoring partition of the wrong granularity");
                inventory.anomalies.push(KeyAnomaly {
                    key: entry.key,
                    reason: format!("not a {} partition", self.granularity),
                });
                continue;
            }

            if entry.size_bytes < self.min_partition_bytes {
                debug!(series, key = %entry.key, size = entry.size_bytes, "undersized partition treated as absent");
                inventory.undersized.push((coord, entry.size_bytes));
                continue;
            }

            inventory.present.insert(coord);
        }

        debug!(
            series,
            present = inventory.present.len(),
            undersized = inventory.undersized.len(),
            anomalies = inventory.anomalies.len(),
            "scan complete"
        );
        Ok(inventory)
    }

    /// Series that have at least one object under the archive root, sorted.
    pub fn discover_series(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.store.list(&self.layout.root_prefix())?;
        let series: BTreeSet<String> = entries
            .iter()
            .filter_map(|e| self.layout.series_of_key(&e.key))
            .map(str::to_string)
            .collect();
        Ok(series.into_iter().collect())
    }
}

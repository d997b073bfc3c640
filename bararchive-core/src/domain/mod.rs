//! Domain types for the bar archive

pub mod bar;
pub mod partition;
pub mod ticker;

pub use bar::Bar;
pub use partition::{
    Granularity, HourlyWindow, PartitionCoordinate, PartitionKeyError, PartitionLayout,
};
pub use ticker::{TickerDetails, TickerRecord, DETAILS_SCHEMA_VERSION};

/// Series type alias
pub type Series = String;

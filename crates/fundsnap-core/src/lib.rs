//! fundsnap core library.
//!
//! Keeps a local Parquet snapshot of aggregated funding activity in step with
//! the warehouse by fetching only rows inserted after the snapshot's own
//! high-water mark.

pub mod exit_codes;
pub mod logging;
pub mod sync;
pub mod warehouse;

pub use sync::{SyncEngine, SyncMode, SyncOutcome, SyncReport};
pub use warehouse::{Aggregator, BigQueryAggregator, WarehouseError};

pub use fundsnap_common::{Error, Result};

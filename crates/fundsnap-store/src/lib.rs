//! fundsnap snapshot storage.
//!
//! This crate provides:
//! - The Arrow schema of the funding snapshot table
//! - Normalization of warehouse wire types into persistable types
//! - Best-effort reconciliation of incoming column types
//! - The Parquet-backed snapshot store (watermark read, merge, replace)

pub mod error;
pub mod normalize;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use normalize::{is_wire_date, normalize};
pub use reconcile::{reconcile, CastOutcome, ColumnCast, Reconciled};
pub use schema::{missing_columns, snapshot_schema, SNAPSHOT_COLUMNS};
pub use store::{MergeOutcome, SnapshotStore};

/// Default snapshot file name.
pub const DEFAULT_SNAPSHOT_FILE: &str = "daily_funding.parquet";

//! fundsnap common types, watermark, and errors.
//!
//! This crate provides foundational types shared across the fundsnap crates:
//! - The sync watermark and where it came from
//! - Run identifiers for correlating log lines of one sync cycle
//! - The unified error type
//! - The snapshot compression setting

pub mod compression;
pub mod error;
pub mod id;
pub mod watermark;

pub use compression::SnapshotCompression;
pub use error::{Error, Result};
pub use id::RunId;
pub use watermark::{Watermark, WatermarkOrigin, WATERMARK_FORMAT};

/// Name of the snapshot column the watermark is derived from.
pub const WATERMARK_COLUMN: &str = "Max_InsertedAt";

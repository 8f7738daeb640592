//! Snapshot block compression choice.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parquet block compressor used when the snapshot is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotCompression {
    #[default]
    Snappy,
    Zstd,
}

impl fmt::Display for SnapshotCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotCompression::Snappy => write!(f, "snappy"),
            SnapshotCompression::Zstd => write!(f, "zstd"),
        }
    }
}

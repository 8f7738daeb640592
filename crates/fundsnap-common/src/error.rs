//! Error types for fundsnap.

use thiserror::Error;

/// Result type alias for fundsnap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for fundsnap.
///
/// Crate-local errors (store, warehouse, config) convert into this type at
/// the orchestrator boundary.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid aggregation query: {0}")]
    InvalidQuery(String),

    // Remote fetch errors (20-29)
    #[error("warehouse fetch failed: {0}")]
    Fetch(String),

    #[error("warehouse response could not be decoded: {0}")]
    Decode(String),

    // Snapshot errors (30-39)
    #[error("snapshot merge failed: {0}")]
    Merge(String),

    #[error("schema conflict on column '{column}': snapshot has {existing}, batch has {incoming}")]
    SchemaConflict {
        column: String,
        existing: String,
        incoming: String,
    },

    #[error("column '{column}' still has warehouse wire type {data_type}; normalize before persisting")]
    UnnormalizedColumn { column: String, data_type: String },

    // I/O and format errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("columnar format error: {0}")]
    Format(String),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used as a structured field on the final failure log line.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidQuery(_) => 11,
            Error::Fetch(_) => 20,
            Error::Decode(_) => 21,
            Error::Merge(_) => 30,
            Error::SchemaConflict { .. } => 31,
            Error::UnnormalizedColumn { .. } => 32,
            Error::Io(_) => 60,
            Error::Format(_) => 61,
        }
    }
}

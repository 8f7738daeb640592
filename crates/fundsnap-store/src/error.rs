//! Error types for snapshot storage.

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Errors that can occur while reading or writing the snapshot.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow compute or batch construction error
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Parquet encode/decode error
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Merge called with a batch holding no rows
    #[error("refusing to merge an empty batch")]
    EmptyBatch,

    /// Column type still differs after reconciliation
    #[error("schema conflict on column '{column}': snapshot has {existing}, batch has {incoming}")]
    SchemaConflict {
        column: String,
        existing: DataType,
        incoming: DataType,
    },

    /// Warehouse wire type reached the persist step
    #[error("column '{column}' has unpersistable wire type {data_type}")]
    UnnormalizedColumn { column: String, data_type: DataType },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for fundsnap_common::Error {
    fn from(e: StoreError) -> Self {
        use fundsnap_common::Error;
        match e {
            StoreError::Io(io) => Error::Io(io),
            StoreError::Arrow(e) => Error::Format(e.to_string()),
            StoreError::Parquet(e) => Error::Format(e.to_string()),
            StoreError::EmptyBatch => Error::Merge("refusing to merge an empty batch".to_string()),
            StoreError::SchemaConflict {
                column,
                existing,
                incoming,
            } => Error::SchemaConflict {
                column,
                existing: existing.to_string(),
                incoming: incoming.to_string(),
            },
            StoreError::UnnormalizedColumn { column, data_type } => Error::UnnormalizedColumn {
                column,
                data_type: data_type.to_string(),
            },
        }
    }
}

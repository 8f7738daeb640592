//! Remote aggregation source.
//!
//! The sync engine only needs "give me every aggregated row inserted after
//! this watermark" as an Arrow batch. [`Aggregator`] is that seam; the
//! production implementation is [`bigquery::BigQueryAggregator`], tests
//! substitute in-memory fakes.

pub mod bigquery;
pub mod decode;

use arrow::record_batch::RecordBatch;
use fundsnap_common::Watermark;
use thiserror::Error;

pub use bigquery::{BigQueryAggregator, JobsTransport, UreqTransport};
pub use decode::BatchDecoder;

/// Errors from fetching aggregated rows.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Connection, TLS, or timeout failure before a response arrived
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status with the API's error message
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The query job reported failure
    #[error("query job failed: {0}")]
    Job(String),

    /// Job still running after the poll limit
    #[error("query job {job_id} incomplete after {polls} polls")]
    Timeout { job_id: String, polls: u32 },

    /// Response body or cell value could not be interpreted
    #[error("{0}")]
    Decode(String),
}

impl From<WarehouseError> for fundsnap_common::Error {
    fn from(e: WarehouseError) -> Self {
        match e {
            WarehouseError::Decode(msg) => fundsnap_common::Error::Decode(msg),
            other => fundsnap_common::Error::Fetch(other.to_string()),
        }
    }
}

/// A source of aggregated snapshot rows.
pub trait Aggregator {
    /// Every aggregated row whose insertion time is strictly after `watermark`.
    ///
    /// An empty batch means no new data. Any error is fatal for the run.
    fn fetch(&self, watermark: &Watermark) -> Result<RecordBatch, WarehouseError>;

    /// Identifier logged next to each fetch.
    fn describe(&self) -> String {
        "aggregator".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_keep_their_category() {
        let err: fundsnap_common::Error = WarehouseError::Decode("bad cell".into()).into();
        assert_eq!(err.code(), 21);
        assert!(err.to_string().contains("bad cell"));
    }

    #[test]
    fn api_errors_become_fetch_failures() {
        let err: fundsnap_common::Error = WarehouseError::Api {
            status: 403,
            message: "Access Denied".into(),
        }
        .into();
        assert_eq!(err.code(), 20);
        assert!(err.to_string().contains("403"));
    }
}

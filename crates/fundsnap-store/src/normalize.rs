//! Warehouse wire-type normalization.
//!
//! BigQuery `DATE` values arrive as Arrow `Date32` (or `Date64`), a date-only
//! representation the snapshot does not persist. Every such column becomes a
//! naive microsecond timestamp at midnight. The watermark column is coerced to
//! a UTC microsecond timestamp so every write stores it the same way.
//!
//! The persist step in [`crate::store`] refuses wire date types, so a batch that
//! skipped this pass fails before any byte is written.

use crate::error::Result;
use crate::schema::{date_type, watermark_type};
use arrow::compute::kernels::cast::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use fundsnap_common::WATERMARK_COLUMN;
use std::sync::Arc;
use tracing::debug;

/// Whether `data_type` is the warehouse date-only wire representation.
pub fn is_wire_date(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Date32 | DataType::Date64)
}

/// Convert wire date columns and the watermark column to persistable types.
///
/// Conversion failures are hard errors: unlike reconciliation, skipping a
/// column here would only move the failure to the write.
pub fn normalize(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };

    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(batch.num_columns());
    let mut changed = false;

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let target = if field.name() == WATERMARK_COLUMN {
            Some(watermark_type()).filter(|t| t != field.data_type())
        } else if is_wire_date(field.data_type()) {
            Some(date_type())
        } else {
            None
        };

        match target {
            Some(to) => {
                debug!(
                    column = %field.name(),
                    from = %field.data_type(),
                    to = %to,
                    "normalizing column type"
                );
                columns.push(cast_with_options(column, &to, &strict)?);
                fields.push(Field::new(field.name(), to, field.is_nullable()));
                changed = true;
            }
            None => {
                columns.push(column.clone());
                fields.push(field.as_ref().clone());
            }
        }
    }

    if !changed {
        return Ok(batch.clone());
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

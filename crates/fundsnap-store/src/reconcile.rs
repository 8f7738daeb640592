//! Best-effort alignment of incoming column types to the snapshot's types.
//!
//! The warehouse client infers types per run, so a count column may come
//! back as `Float64` on one run and `Int64` on the next. Each column present
//! in the target schema is cast to the target type; a column that cannot be
//! cast keeps its original type and a warning is logged for it. Reconciliation
//! itself never fails.

use arrow::array::ArrayRef;
use arrow::compute::kernels::cast::{can_cast_types, cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of reconciling one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CastOutcome {
    /// Type already matched the target.
    Unchanged,
    /// Column was cast to the target type.
    Cast {
        #[serde(serialize_with = "display")]
        from: DataType,
        #[serde(serialize_with = "display")]
        to: DataType,
    },
    /// Cast failed; column keeps `from`.
    Kept {
        #[serde(serialize_with = "display")]
        from: DataType,
        #[serde(serialize_with = "display")]
        to: DataType,
        error: String,
    },
}

fn display<S: serde::Serializer>(t: &DataType, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(t)
}

/// Per-column reconciliation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCast {
    pub column: String,
    #[serde(flatten)]
    pub outcome: CastOutcome,
}

impl ColumnCast {
    pub fn is_cast(&self) -> bool {
        matches!(self.outcome, CastOutcome::Cast { .. })
    }

    /// Cast was attempted and failed.
    pub fn is_kept(&self) -> bool {
        matches!(self.outcome, CastOutcome::Kept { .. })
    }
}

/// A reconciled batch plus what happened to each shared column.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub batch: RecordBatch,
    pub casts: Vec<ColumnCast>,
}

impl Reconciled {
    /// Columns whose cast failed.
    pub fn kept(&self) -> impl Iterator<Item = &ColumnCast> {
        self.casts.iter().filter(|c| c.is_kept())
    }

    /// Number of columns actually converted.
    pub fn cast_count(&self) -> usize {
        self.casts.iter().filter(|c| c.is_cast()).count()
    }
}

/// Cast every column of `batch` that also appears in `target` to the target type.
///
/// Columns missing from `target` and target fields missing from `batch` are
/// left alone; column alignment is the merge's job.
pub fn reconcile(batch: &RecordBatch, target: &Schema) -> Reconciled {
    let schema = batch.schema();
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };

    let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    let mut casts = Vec::new();

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let Ok(target_field) = target.field_with_name(field.name()) else {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
            continue;
        };
        let from = field.data_type().clone();
        let to = target_field.data_type().clone();

        if from == to {
            casts.push(ColumnCast {
                column: field.name().clone(),
                outcome: CastOutcome::Unchanged,
            });
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
            continue;
        }

        let attempt = if can_cast_types(&from, &to) {
            cast_with_options(column, &to, &strict).map_err(|e| e.to_string())
        } else {
            Err(format!("no cast from {from} to {to}"))
        };

        match attempt {
            Ok(converted) => {
                debug!(column = %field.name(), from = %from, to = %to, "column cast to snapshot type");
                fields.push(Field::new(field.name(), to.clone(), field.is_nullable()));
                columns.push(converted);
                casts.push(ColumnCast {
                    column: field.name().clone(),
                    outcome: CastOutcome::Cast { from, to },
                });
            }
            Err(error) => {
                warn!(
                    column = %field.name(),
                    from = %from,
                    to = %to,
                    error = %error,
                    "type cast failed; keeping original column type"
                );
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
                casts.push(ColumnCast {
                    column: field.name().clone(),
                    outcome: CastOutcome::Kept { from, to, error },
                });
            }
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    match RecordBatch::try_new_with_options(schema, columns, &options) {
        Ok(reconciled) => Reconciled {
            batch: reconciled,
            casts,
        },
        Err(e) => {
            warn!(error = %e, "reconciled batch rejected; keeping incoming types");
            let casts = casts.into_iter().map(revert).collect();
            Reconciled {
                batch: batch.clone(),
                casts,
            }
        }
    }
}

fn revert(cast: ColumnCast) -> ColumnCast {
    match cast.outcome {
        CastOutcome::Cast { from, to } => ColumnCast {
            column: cast.column,
            outcome: CastOutcome::Kept {
                from,
                to,
                error: "batch reassembly failed".to_string(),
            },
        },
        _ => cast,
    }
}

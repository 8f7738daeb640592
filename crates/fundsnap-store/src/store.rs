//! Parquet-backed snapshot store.
//!
//! The snapshot is a single Parquet file that is only ever replaced whole:
//! merges read the entire table, append the new rows in memory, and write the
//! result to a sibling `.tmp` file that is fsynced and renamed over the
//! original. A crash before the rename leaves the previous snapshot intact.
//!
//! The store assumes one exclusive writer and no readers during a write.

use crate::error::{Result, StoreError};
use crate::normalize::is_wire_date;
use crate::reconcile::{reconcile, ColumnCast};
use crate::schema::watermark_type;
use arrow::array::{new_null_array, ArrayRef, AsArray};
use arrow::compute::concat_batches;
use arrow::compute::kernels::cast::{cast_with_options, CastOptions};
use arrow::datatypes::{Field, Schema, SchemaRef, TimestampMicrosecondType};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use fundsnap_common::{SnapshotCompression, Watermark, WatermarkOrigin, WATERMARK_COLUMN};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    /// Rows in the snapshot after the write.
    pub total_rows: usize,
    /// Rows taken from the incoming batch.
    pub appended_rows: usize,
    /// Whether the snapshot did not exist before this merge.
    pub created: bool,
    /// Per-column reconciliation results (empty when `created`).
    pub casts: Vec<ColumnCast>,
}

impl MergeOutcome {
    /// Columns converted to the snapshot's type.
    pub fn columns_cast(&self) -> usize {
        self.casts.iter().filter(|c| c.is_cast()).count()
    }

    /// Columns whose cast failed and kept the incoming type.
    pub fn columns_kept(&self) -> usize {
        self.casts.iter().filter(|c| c.is_kept()).count()
    }
}

/// The on-disk snapshot table.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    compression: Compression,
}

impl SnapshotStore {
    /// Store at `path`, Snappy-compressed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            compression: Compression::SNAPPY,
        }
    }

    /// Use a different block compressor for subsequent writes.
    pub fn with_compression(mut self, compression: SnapshotCompression) -> Self {
        self.compression = match compression {
            SnapshotCompression::Snappy => Compression::SNAPPY,
            SnapshotCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        };
        self
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the snapshot file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Derive the watermark from the snapshot.
    ///
    /// Only the watermark column is decoded. Never fails; every fallback
    /// yields the epoch tagged with its own [`WatermarkOrigin`].
    pub fn read_watermark(&self) -> Watermark {
        if !self.path.exists() {
            info!(
                path = %self.path.display(),
                "snapshot not found; fetching from epoch (full load)"
            );
            return Watermark::epoch(WatermarkOrigin::MissingSnapshot);
        }

        match self.max_inserted_at() {
            Ok(Some(micros)) => match Watermark::from_micros(micros) {
                Some(watermark) => {
                    debug!(watermark = %watermark.to_query_param(), "watermark derived from snapshot");
                    watermark
                }
                None => self.degraded(format!("watermark value {micros} out of range")),
            },
            Ok(None) => {
                warn!(
                    path = %self.path.display(),
                    "snapshot holds no watermark values; fetching from epoch"
                );
                Watermark::epoch(WatermarkOrigin::EmptySnapshot)
            }
            Err(e) => self.degraded(e.to_string()),
        }
    }

    fn degraded(&self, reason: String) -> Watermark {
        warn!(
            path = %self.path.display(),
            column = WATERMARK_COLUMN,
            reason = %reason,
            "watermark unreadable; degrading to full fetch from epoch"
        );
        Watermark::epoch(WatermarkOrigin::Degraded { reason })
    }

    /// Maximum of the watermark column in UTC microseconds.
    fn max_inserted_at(&self) -> Result<Option<i64>> {
        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let index = builder.schema().index_of(WATERMARK_COLUMN)?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), [index]);
        let reader = builder.with_projection(mask).build()?;

        let target = watermark_type();
        let strict = CastOptions {
            safe: false,
            ..Default::default()
        };

        let mut max: Option<i64> = None;
        for batch in reader {
            let batch = batch?;
            let column = cast_with_options(batch.column(0), &target, &strict)?;
            let values = column
                .as_primitive_opt::<TimestampMicrosecondType>()
                .ok_or_else(|| {
                    ArrowError::CastError(format!(
                        "{WATERMARK_COLUMN} did not cast to {target}"
                    ))
                })?;
            if let Some(batch_max) = arrow::compute::max(values) {
                max = Some(max.map_or(batch_max, |m| m.max(batch_max)));
            }
        }
        Ok(max)
    }

    /// Row count from the file footer, `None` when the file is absent.
    pub fn row_count(&self) -> Result<Option<usize>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?)?;
        let rows = builder.metadata().file_metadata().num_rows();
        Ok(Some(usize::try_from(rows).unwrap_or(0)))
    }

    /// Read the whole table as one batch, `None` when the file is absent.
    pub fn read_all(&self) -> Result<Option<RecordBatch>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?)?;
        let schema = builder.schema().clone();
        let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(concat_batches(&schema, &batches)?))
    }

    /// Append `batch` after the existing rows and persist.
    ///
    /// The batch is first reconciled to the snapshot's column types. Existing
    /// rows keep their order and the batch rows follow in incoming order.
    /// When no snapshot exists the batch is written verbatim.
    pub fn merge(&self, batch: &RecordBatch) -> Result<MergeOutcome> {
        if batch.num_rows() == 0 {
            return Err(StoreError::EmptyBatch);
        }

        let Some(existing) = self.read_all()? else {
            info!(
                path = %self.path.display(),
                rows = batch.num_rows(),
                "snapshot missing; creating it from the incoming batch"
            );
            self.persist(batch)?;
            return Ok(MergeOutcome {
                total_rows: batch.num_rows(),
                appended_rows: batch.num_rows(),
                created: true,
                casts: Vec::new(),
            });
        };

        let reconciled = reconcile(batch, &existing.schema());
        let combined = append(&existing, &reconciled.batch)?;
        self.persist(&combined)?;

        info!(
            existing_rows = existing.num_rows(),
            appended_rows = batch.num_rows(),
            total_rows = combined.num_rows(),
            columns_cast = reconciled.cast_count(),
            columns_kept = reconciled.kept().count(),
            "snapshot merged"
        );
        Ok(MergeOutcome {
            total_rows: combined.num_rows(),
            appended_rows: batch.num_rows(),
            created: false,
            casts: reconciled.casts,
        })
    }

    /// Replace the snapshot with `batch` (full load).
    pub fn replace(&self, batch: &RecordBatch) -> Result<usize> {
        self.persist(batch)?;
        info!(
            path = %self.path.display(),
            rows = batch.num_rows(),
            "snapshot replaced"
        );
        Ok(batch.num_rows())
    }

    /// Stage to a temp file and rename over the snapshot.
    fn persist(&self, batch: &RecordBatch) -> Result<()> {
        ensure_persistable(&batch.schema())?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.temp_path();
        if let Err(e) = self.write_file(&tmp_path, batch) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = sync_parent_dir(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "snapshot renamed but directory fsync failed"
            );
        }

        debug!(path = %self.path.display(), rows = batch.num_rows(), "snapshot written");
        Ok(())
    }

    fn write_file(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        let file = writer.into_inner()?;
        file.sync_all()?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::DEFAULT_SNAPSHOT_FILE.to_string());
        self.path.with_file_name(format!("{name}.tmp"))
    }
}

/// Reject batches still carrying warehouse wire types.
fn ensure_persistable(schema: &Schema) -> Result<()> {
    match schema.fields().iter().find(|f| is_wire_date(f.data_type())) {
        Some(field) => Err(StoreError::UnnormalizedColumn {
            column: field.name().clone(),
            data_type: field.data_type().clone(),
        }),
        None => Ok(()),
    }
}

/// Concatenate `incoming` after `existing` under a unified schema.
///
/// Shared columns must agree on type. A column present on only one side is
/// null-filled on the other; new incoming columns go after existing ones.
fn append(existing: &RecordBatch, incoming: &RecordBatch) -> Result<RecordBatch> {
    let old_schema = existing.schema();
    let new_schema = incoming.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(old_schema.fields().len());

    for field in old_schema.fields() {
        match new_schema.field_with_name(field.name()) {
            Ok(other) => {
                if other.data_type() != field.data_type() {
                    return Err(StoreError::SchemaConflict {
                        column: field.name().clone(),
                        existing: field.data_type().clone(),
                        incoming: other.data_type().clone(),
                    });
                }
                let nullable = field.is_nullable() || other.is_nullable();
                fields.push(field.as_ref().clone().with_nullable(nullable));
            }
            Err(_) => {
                warn!(column = %field.name(), "column absent from incoming batch; filling with nulls");
                fields.push(field.as_ref().clone().with_nullable(true));
            }
        }
    }
    for field in new_schema.fields() {
        if old_schema.field_with_name(field.name()).is_err() {
            warn!(column = %field.name(), "new column in incoming batch; backfilling snapshot rows with nulls");
            fields.push(field.as_ref().clone().with_nullable(true));
        }
    }

    let merged: SchemaRef = Arc::new(Schema::new_with_metadata(
        fields,
        old_schema.metadata().clone(),
    ));
    let old = project_onto(existing, &merged)?;
    let new = project_onto(incoming, &merged)?;
    Ok(concat_batches(&merged, [&old, &new])?)
}

fn project_onto(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|f| match batch.column_by_name(f.name()) {
            Some(column) => column.clone(),
            None => new_null_array(f.data_type(), batch.num_rows()),
        })
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        schema.clone(),
        columns,
        &options,
    )?)
}

/// Flush the directory entry of `path` so a completed rename survives power loss.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

//! Incremental sync orchestration.
//!
//! One run is a linear pipeline:
//!
//! 1. Determine the watermark (snapshot max, or the configured full-load start)
//! 2. Fetch rows inserted after it
//! 3. Stop without touching the snapshot when nothing came back
//! 4. Normalize warehouse wire types
//! 5. Merge into (incremental) or replace (full) the snapshot
//! 6. Report
//!
//! Every failure is fatal and propagates; the snapshot is only replaced by a
//! completed atomic write, so a failed run leaves it exactly as it was and the
//! next run re-derives the same watermark.

use crate::warehouse::Aggregator;
use chrono::{DateTime, Utc};
use fundsnap_common::{Error, Result, RunId, Watermark};
use fundsnap_store::{missing_columns, normalize, SnapshotStore};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Dispatch};

/// Which kind of run to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Rebuild the snapshot from the configured historical start.
    Full,
    /// Append rows newer than the snapshot's watermark.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// What a successful run did to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SyncOutcome {
    /// Nothing fetched; snapshot untouched.
    NoNewData,
    /// Rows appended (or the snapshot created).
    Merged {
        total_rows: usize,
        created: bool,
        columns_cast: usize,
        columns_kept: usize,
    },
    /// Snapshot rewritten by a full load.
    Replaced { total_rows: usize },
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: RunId,
    pub mode: SyncMode,
    pub watermark: Watermark,
    pub fetched_rows: usize,
    pub outcome: SyncOutcome,
    pub elapsed_ms: u64,
}

impl SyncReport {
    /// Rows in the snapshot after the run, when it was written.
    pub fn total_rows(&self) -> Option<usize> {
        match self.outcome {
            SyncOutcome::NoNewData => None,
            SyncOutcome::Merged { total_rows, .. } | SyncOutcome::Replaced { total_rows } => {
                Some(total_rows)
            }
        }
    }
}

/// Drives sync runs against one snapshot and one aggregator.
pub struct SyncEngine<A> {
    store: SnapshotStore,
    aggregator: A,
    full_load_start: DateTime<Utc>,
    dispatch: Dispatch,
}

impl<A: Aggregator> SyncEngine<A> {
    pub fn new(
        store: SnapshotStore,
        aggregator: A,
        full_load_start: DateTime<Utc>,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            store,
            aggregator,
            full_load_start,
            dispatch,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Execute one run under this engine's logging dispatch.
    pub fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let run_id = RunId::new();
            let span = info_span!("sync_run", run_id = %run_id, mode = %mode);
            let _enter = span.enter();

            let result = self.run_stages(run_id, mode);
            if let Err(e) = &result {
                error!(code = e.code(), error = %e, "sync failed");
            }
            result
        })
    }

    fn run_stages(&self, run_id: RunId, mode: SyncMode) -> Result<SyncReport> {
        let started = Instant::now();
        info!(snapshot = %self.store.path().display(), "sync started");

        let watermark = match mode {
            SyncMode::Incremental => self.store.read_watermark(),
            SyncMode::Full => Watermark::full_load(self.full_load_start),
        };
        info!(
            watermark = %watermark.to_query_param(),
            origin = %watermark.origin,
            "watermark determined"
        );

        let fetched = self.aggregator.fetch(&watermark).map_err(Error::from)?;
        info!(
            rows = fetched.num_rows(),
            source = %self.aggregator.describe(),
            "fetched rows"
        );

        let finish = |outcome: SyncOutcome| SyncReport {
            run_id: run_id.clone(),
            mode,
            watermark: watermark.clone(),
            fetched_rows: fetched.num_rows(),
            outcome,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if fetched.num_rows() == 0 {
            info!("no new data; snapshot unchanged");
            return Ok(finish(SyncOutcome::NoNewData));
        }

        let batch = normalize(&fetched)?;
        let missing = missing_columns(&batch.schema());
        if !missing.is_empty() {
            warn!(columns = ?missing, "fetched batch lacks snapshot columns");
        }

        let outcome = match mode {
            SyncMode::Incremental => {
                let merged = self.store.merge(&batch)?;
                SyncOutcome::Merged {
                    total_rows: merged.total_rows,
                    created: merged.created,
                    columns_cast: merged.columns_cast(),
                    columns_kept: merged.columns_kept(),
                }
            }
            SyncMode::Full => SyncOutcome::Replaced {
                total_rows: self.store.replace(&batch)?,
            },
        };

        let report = finish(outcome);
        info!(
            fetched_rows = report.fetched_rows,
            total_rows = report.total_rows(),
            elapsed_ms = report.elapsed_ms,
            "sync complete"
        );
        Ok(report)
    }
}

//! The incremental sync watermark.
//!
//! A watermark is never stored on its own. It is re-derived on every run as
//! the maximum `Max_InsertedAt` value in the snapshot, so a failed run leaves
//! nothing behind that could advance it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of the watermark when bound as a warehouse query parameter.
///
/// Example: `2026-01-15 14:30:22.123456+00:00`
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f+00:00";

/// Where a watermark value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WatermarkOrigin {
    /// Derived as the maximum of the snapshot's watermark column.
    Snapshot,
    /// No snapshot file exists; first run.
    MissingSnapshot,
    /// The snapshot exists but holds no non-null watermark values.
    EmptySnapshot,
    /// The snapshot exists but could not be read; falls back to a full fetch.
    Degraded { reason: String },
    /// Forced to the configured historical start for a full load.
    FullLoad,
}

impl fmt::Display for WatermarkOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkOrigin::Snapshot => write!(f, "snapshot"),
            WatermarkOrigin::MissingSnapshot => write!(f, "missing_snapshot"),
            WatermarkOrigin::EmptySnapshot => write!(f, "empty_snapshot"),
            WatermarkOrigin::Degraded { .. } => write!(f, "degraded"),
            WatermarkOrigin::FullLoad => write!(f, "full_load"),
        }
    }
}

/// Exclusive lower bound for the next remote fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// The instant, truncated to microseconds.
    pub at: DateTime<Utc>,
    pub origin: WatermarkOrigin,
}

impl Watermark {
    /// Watermark derived from the snapshot's maximum inserted-at value.
    pub fn from_snapshot(at: DateTime<Utc>) -> Self {
        Self {
            at: truncate_to_micros(at),
            origin: WatermarkOrigin::Snapshot,
        }
    }

    /// Watermark derived from a raw microsecond count since the epoch.
    pub fn from_micros(micros: i64) -> Option<Self> {
        Utc.timestamp_micros(micros).single().map(Self::from_snapshot)
    }

    /// Epoch-start sentinel with the given fallback origin.
    pub fn epoch(origin: WatermarkOrigin) -> Self {
        Self {
            at: DateTime::<Utc>::UNIX_EPOCH,
            origin,
        }
    }

    /// Forced historical start for a full load.
    pub fn full_load(at: DateTime<Utc>) -> Self {
        Self {
            at: truncate_to_micros(at),
            origin: WatermarkOrigin::FullLoad,
        }
    }

    /// Render as the warehouse query parameter.
    pub fn to_query_param(&self) -> String {
        self.at.format(WATERMARK_FORMAT).to_string()
    }

    /// Microseconds since the epoch.
    pub fn micros(&self) -> i64 {
        self.at.timestamp_micros()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.to_query_param(), self.origin)
    }
}

fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_micros(at.timestamp_micros())
        .single()
        .unwrap_or(at)
}

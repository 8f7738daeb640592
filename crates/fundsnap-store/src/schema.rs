//! Arrow schema of the funding snapshot table.
//!
//! One row per bucket of
//! `(Date, providerKey, method, channel_type, type, reqCurrency,
//! account_group, group_re, Country, status, Hour)`.
//!
//! The store does not enforce this schema: the persisted file's own types are
//! authoritative for merges. It describes the shape the warehouse query is
//! expected to return after normalization, and is used to flag drift.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use fundsnap_common::WATERMARK_COLUMN;
use std::sync::Arc;

/// Bucket key columns.
pub const DIMENSION_COLUMNS: [&str; 11] = [
    "Date",
    "providerKey",
    "method",
    "channel_type",
    "type",
    "reqCurrency",
    "account_group",
    "group_re",
    "Country",
    "status",
    "Hour",
];

/// Completed-transaction latency counters, by cutoff.
pub const LATENCY_BUCKET_COLUMNS: [&str; 8] = [
    "Count_01m30s_Below",
    "Count_01m31s_to_02m00s",
    "Count_02m01s_to_03m00s",
    "Count_03m00s_Above",
    "Count_03m00s_Below",
    "Count_03m31s_to_05m00s",
    "Count_05m00s_to_10m00s",
    "Count_10m00s_Above",
];

/// All snapshot columns in file order.
pub const SNAPSHOT_COLUMNS: [&str; 27] = [
    "Date",
    "providerKey",
    "method",
    "channel_type",
    "type",
    "reqCurrency",
    "account_group",
    "group_re",
    "Country",
    "status",
    "Hour",
    "Count",
    "Total_Net_Amount",
    WATERMARK_COLUMN,
    "winsorized_total_time_seconds",
    "DateMonth",
    "Count_01m30s_Below",
    "Count_01m31s_to_02m00s",
    "Count_02m01s_to_03m00s",
    "Count_03m00s_Above",
    "Count_03m00s_Below",
    "Count_03m31s_to_05m00s",
    "Count_05m00s_to_10m00s",
    "Count_10m00s_Above",
    "providerName",
    "channel_main",
    "brand",
];

/// Canonical persisted type of the watermark column.
pub fn watermark_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

/// Canonical persisted type of warehouse DATE columns.
pub fn date_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, None)
}

/// The normalized snapshot schema.
pub fn snapshot_schema() -> SchemaRef {
    let fields: Vec<Field> = SNAPSHOT_COLUMNS
        .iter()
        .map(|name| Field::new(*name, column_type(name), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn column_type(name: &str) -> DataType {
    match name {
        "Date" | "DateMonth" => date_type(),
        WATERMARK_COLUMN => watermark_type(),
        "Count" => DataType::Int64,
        "Total_Net_Amount" | "winsorized_total_time_seconds" => DataType::Float64,
        n if LATENCY_BUCKET_COLUMNS.contains(&n) => DataType::Int64,
        _ => DataType::Utf8,
    }
}

/// Snapshot columns absent from `schema`.
pub fn missing_columns(schema: &Schema) -> Vec<&'static str> {
    SNAPSHOT_COLUMNS
        .iter()
        .copied()
        .filter(|name| schema.index_of(name).is_err())
        .collect()
}

//! BigQuery REST result decoding into Arrow.
//!
//! `jobs.query` and `jobs.getQueryResults` return rows as
//! `{"f": [{"v": ...}, ...]}` with every scalar encoded as a JSON string.
//! [`BatchDecoder`] accumulates pages of such rows into one [`RecordBatch`]
//! typed by the response schema.
//!
//! Type mapping:
//!
//! | BigQuery                           | Arrow                          |
//! |------------------------------------|--------------------------------|
//! | STRING                             | Utf8                           |
//! | INT64, INTEGER                     | Int64                          |
//! | FLOAT64, FLOAT, NUMERIC, BIGNUMERIC| Float64                        |
//! | BOOL, BOOLEAN                      | Boolean                        |
//! | TIMESTAMP                          | Timestamp(Microsecond, "UTC")  |
//! | DATE                               | Date32                         |
//! | DATETIME                           | Timestamp(Microsecond, None)   |
//! | anything else, REPEATED            | Utf8 (JSON text)               |

use super::WarehouseError;
use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Response of `jobs.query` / `jobs.getQueryResults`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    pub job_reference: Option<JobReference>,
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    pub page_token: Option<String>,
    pub total_rows: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorProto {
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ErrorProto {
    pub fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(r), Some(m)) => format!("{r}: {m}"),
            (None, Some(m)) => m.clone(),
            (Some(r), None) => r.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireType {
    String,
    Int64,
    Float64,
    Bool,
    Timestamp,
    Date,
    DateTime,
}

impl WireType {
    fn of(field: &TableFieldSchema) -> Self {
        if field.mode.as_deref() == Some("REPEATED") {
            return WireType::String;
        }
        match field.field_type.as_str() {
            "INT64" | "INTEGER" => WireType::Int64,
            "FLOAT64" | "FLOAT" | "NUMERIC" | "BIGNUMERIC" => WireType::Float64,
            "BOOL" | "BOOLEAN" => WireType::Bool,
            "TIMESTAMP" => WireType::Timestamp,
            "DATE" => WireType::Date,
            "DATETIME" => WireType::DateTime,
            _ => WireType::String,
        }
    }

    fn arrow_type(self) -> DataType {
        match self {
            WireType::String => DataType::Utf8,
            WireType::Int64 => DataType::Int64,
            WireType::Float64 => DataType::Float64,
            WireType::Bool => DataType::Boolean,
            WireType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            WireType::Date => DataType::Date32,
            WireType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

enum ColumnBuilder {
    Utf8(StringBuilder),
    Int64(Int64Builder),
    Float64(Float64Builder),
    Boolean(BooleanBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Date(Date32Builder),
}

impl ColumnBuilder {
    fn new(wire: WireType) -> Self {
        match wire {
            WireType::String => ColumnBuilder::Utf8(StringBuilder::new()),
            WireType::Int64 => ColumnBuilder::Int64(Int64Builder::new()),
            WireType::Float64 => ColumnBuilder::Float64(Float64Builder::new()),
            WireType::Bool => ColumnBuilder::Boolean(BooleanBuilder::new()),
            WireType::Timestamp => {
                ColumnBuilder::Timestamp(TimestampMicrosecondBuilder::new().with_timezone("UTC"))
            }
            WireType::DateTime => ColumnBuilder::Timestamp(TimestampMicrosecondBuilder::new()),
            WireType::Date => ColumnBuilder::Date(Date32Builder::new()),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(b) => Arc::new(b.finish()),
            ColumnBuilder::Boolean(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
            ColumnBuilder::Date(b) => Arc::new(b.finish()),
        }
    }
}

struct Column {
    name: String,
    wire: WireType,
    builder: ColumnBuilder,
}

impl Column {
    fn push(&mut self, value: &Value) -> Result<(), String> {
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.as_str()),
            _ if self.wire == WireType::String => {
                let rendered = value.to_string();
                if let ColumnBuilder::Utf8(b) = &mut self.builder {
                    b.append_value(rendered);
                }
                return Ok(());
            }
            other => return Err(format!("unexpected JSON value {other}")),
        };

        match (&mut self.builder, text) {
            (ColumnBuilder::Utf8(b), v) => b.append_option(v),
            (ColumnBuilder::Int64(b), v) => b.append_option(v.map(parse_i64).transpose()?),
            (ColumnBuilder::Float64(b), v) => b.append_option(v.map(parse_f64).transpose()?),
            (ColumnBuilder::Boolean(b), v) => b.append_option(v.map(parse_bool).transpose()?),
            (ColumnBuilder::Date(b), v) => b.append_option(v.map(parse_date).transpose()?),
            (ColumnBuilder::Timestamp(b), v) => {
                let micros = match self.wire {
                    WireType::DateTime => v.map(parse_datetime).transpose()?,
                    _ => v.map(parse_timestamp).transpose()?,
                };
                b.append_option(micros)
            }
        }
        Ok(())
    }
}

fn parse_i64(s: &str) -> Result<i64, String> {
    s.parse().map_err(|_| format!("'{s}' is not an INT64"))
}

fn parse_f64(s: &str) -> Result<f64, String> {
    s.parse().map_err(|_| format!("'{s}' is not a FLOAT64"))
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "true" | "TRUE" => Ok(true),
        "false" | "FALSE" => Ok(false),
        _ => Err(format!("'{s}' is not a BOOL")),
    }
}

fn parse_date(s: &str) -> Result<i32, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .map_err(|_| format!("'{s}' is not a DATE"))
}

/// Microseconds since the epoch; `useInt64Timestamp` yields an integer
/// string, otherwise a float count of seconds.
fn parse_timestamp(s: &str) -> Result<i64, String> {
    if let Ok(micros) = s.parse::<i64>() {
        return Ok(micros);
    }
    s.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .map(|secs| (secs * 1_000_000.0).round() as i64)
        .ok_or_else(|| format!("'{s}' is not a TIMESTAMP"))
}

fn parse_datetime(s: &str) -> Result<i64, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.and_utc().timestamp_micros())
        .map_err(|_| format!("'{s}' is not a DATETIME"))
}

/// Accumulates result pages into one Arrow batch.
pub struct BatchDecoder {
    columns: Vec<Column>,
    rows: usize,
}

impl BatchDecoder {
    pub fn new(schema: &TableSchema) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|field| {
                let wire = WireType::of(field);
                Column {
                    name: field.name.clone(),
                    wire,
                    builder: ColumnBuilder::new(wire),
                }
            })
            .collect();
        Self { columns, rows: 0 }
    }

    /// Arrow schema the decoded batch will carry.
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.wire.arrow_type(), true))
                .collect::<Vec<_>>(),
        )
    }

    /// Rows decoded so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one page of rows.
    pub fn push_rows(&mut self, rows: &[TableRow]) -> Result<(), WarehouseError> {
        for row in rows {
            if row.f.len() != self.columns.len() {
                return Err(WarehouseError::Decode(format!(
                    "row {} has {} cells, schema has {} fields",
                    self.rows,
                    row.f.len(),
                    self.columns.len()
                )));
            }
            for (column, cell) in self.columns.iter_mut().zip(&row.f) {
                column.push(&cell.v).map_err(|e| {
                    WarehouseError::Decode(format!(
                        "row {} column '{}': {e}",
                        self.rows, column.name
                    ))
                })?;
            }
            self.rows += 1;
        }
        Ok(())
    }

    /// Build the batch.
    pub fn finish(mut self) -> Result<RecordBatch, WarehouseError> {
        let schema = Arc::new(self.schema());
        let arrays: Vec<ArrayRef> = self.columns.iter_mut().map(|c| c.builder.finish()).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        RecordBatch::try_new_with_options(schema, arrays, &options)
            .map_err(|e| WarehouseError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Date32Type, Float64Type, Int64Type, TimestampMicrosecondType};
    use serde_json::json;

    fn response(body: Value) -> QueryResponse {
        serde_json::from_value(body).unwrap()
    }

    fn funding_page() -> QueryResponse {
        response(json!({
            "kind": "bigquery#queryResponse",
            "jobComplete": true,
            "jobReference": {"projectId": "analytics", "jobId": "job_1", "location": "US"},
            "totalRows": "2",
            "schema": {"fields": [
                {"name": "Date", "type": "DATE", "mode": "NULLABLE"},
                {"name": "providerKey", "type": "STRING", "mode": "NULLABLE"},
                {"name": "Count", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "Total_Net_Amount", "type": "FLOAT", "mode": "NULLABLE"},
                {"name": "Max_InsertedAt", "type": "TIMESTAMP", "mode": "NULLABLE"}
            ]},
            "rows": [
                {"f": [{"v": "2025-11-02"}, {"v": "payfast"}, {"v": "3"}, {"v": "150.5"}, {"v": "1762077600000000"}]},
                {"f": [{"v": null}, {"v": "ozow"}, {"v": "1"}, {"v": null}, {"v": "1762077600000001"}]}
            ]
        }))
    }

    #[test]
    fn decodes_typed_columns() {
        let page = funding_page();
        let mut decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        decoder.push_rows(&page.rows).unwrap();
        let batch = decoder.finish().unwrap();

        assert_eq!(batch.num_rows(), 2);
        let date = batch.column_by_name("Date").unwrap();
        assert_eq!(date.data_type(), &DataType::Date32);
        assert_eq!(date.as_primitive::<Date32Type>().value(0), 20_394);
        assert!(date.is_null(1));

        let count = batch.column_by_name("Count").unwrap();
        assert_eq!(count.as_primitive::<Int64Type>().values().to_vec(), vec![3, 1]);

        let amount = batch.column_by_name("Total_Net_Amount").unwrap();
        assert_eq!(amount.as_primitive::<Float64Type>().value(0), 150.5);
        assert!(amount.is_null(1));

        let inserted = batch.column_by_name("Max_InsertedAt").unwrap();
        assert_eq!(
            inserted.data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
        assert_eq!(
            inserted.as_primitive::<TimestampMicrosecondType>().value(1),
            1_762_077_600_000_001
        );
    }

    #[test]
    fn pages_accumulate() {
        let page = funding_page();
        let mut decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        decoder.push_rows(&page.rows).unwrap();
        decoder.push_rows(&page.rows).unwrap();
        assert_eq!(decoder.rows(), 4);
        assert_eq!(decoder.finish().unwrap().num_rows(), 4);
    }

    #[test]
    fn float_second_timestamps_are_accepted() {
        assert_eq!(parse_timestamp("1.7620776E9").unwrap(), 1_762_077_600_000_000);
        assert!(parse_timestamp("soon").is_err());
    }

    #[test]
    fn datetime_is_naive_micros() {
        assert_eq!(
            parse_datetime("1970-01-01T00:00:01.5").unwrap(),
            1_500_000
        );
        assert_eq!(parse_datetime("1970-01-02 00:00:00").unwrap(), 86_400_000_000);
    }

    #[test]
    fn unknown_and_repeated_types_become_text() {
        let page = response(json!({
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "geo", "type": "GEOGRAPHY"},
                {"name": "tags", "type": "STRING", "mode": "REPEATED"}
            ]},
            "rows": [{"f": [{"v": "POINT(1 2)"}, {"v": [{"v": "a"}, {"v": "b"}]}]}]
        }));
        let mut decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        decoder.push_rows(&page.rows).unwrap();
        let batch = decoder.finish().unwrap();
        assert_eq!(batch.column(0).as_string::<i32>().value(0), "POINT(1 2)");
        assert_eq!(
            batch.column(1).as_string::<i32>().value(0),
            r#"[{"v":"a"},{"v":"b"}]"#
        );
    }

    #[test]
    fn bad_cell_names_row_and_column() {
        let page = response(json!({
            "jobComplete": true,
            "schema": {"fields": [{"name": "Count", "type": "INT64"}]},
            "rows": [{"f": [{"v": "1"}]}, {"f": [{"v": "lots"}]}]
        }));
        let mut decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        let err = decoder.push_rows(&page.rows).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 1"), "{msg}");
        assert!(msg.contains("'Count'"), "{msg}");
    }

    #[test]
    fn ragged_row_is_rejected() {
        let page = funding_page();
        let mut decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        let short = TableRow {
            f: vec![TableCell::default()],
        };
        assert!(matches!(
            decoder.push_rows(&[short]),
            Err(WarehouseError::Decode(_))
        ));
    }

    #[test]
    fn empty_result_keeps_schema() {
        let page = response(json!({
            "jobComplete": true,
            "totalRows": "0",
            "schema": {"fields": [{"name": "Count", "type": "INT64"}]}
        }));
        let decoder = BatchDecoder::new(page.schema.as_ref().unwrap());
        let batch = decoder.finish().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
    }
}

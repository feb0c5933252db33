// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Columnar (relational) sink.
//!
//! Each measurement maps to a target table whose columns are:
//!
//! ```text
//! time | data | <fields_as_columns...> | <tags_as_columns...>
//! ```
//!
//! `data` is a JSON object holding every tag and field not projected into a
//! column (a field wins over a tag with the same key). A projected column
//! whose tag or field is absent on a point is written as NULL.
//!
//! One [`ColumnarSink::write`] call is one transaction: every batch is
//! appended, each append's row count is checked, and any failure rolls the
//! whole call back.

use crate::config::{ColumnarOutput, OutputConfig};
use crate::error::{BackendError, PipelineError};
use crate::point::{FieldValue, Point, PointGroup};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::future::Future;
use tracing::{debug, warn};

/// Name of the timestamp column.
pub const TIME_COLUMN: &str = "time";

/// Name of the JSON overflow column.
pub const DATA_COLUMN: &str = "data";

/// One cell of a columnar row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Timestamp(DateTime<Utc>),
    /// Serialized JSON object.
    Json(String),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&FieldValue> for ColumnValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(v) => ColumnValue::Integer(*v),
            FieldValue::Float(v) => ColumnValue::Float(*v),
            FieldValue::Text(v) => ColumnValue::Text(v.clone()),
        }
    }
}

/// Rows destined for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarBatch {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ColumnValue>>,
}

impl ColumnarBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build one batch per group from the output's column projections.
pub fn build_batches(
    groups: &[PointGroup],
    output: &ColumnarOutput,
) -> Result<Vec<ColumnarBatch>, PipelineError> {
    let mut batches = Vec::with_capacity(groups.len());

    for group in groups {
        let config = output.columnar_measurement(&group.measurement).ok_or_else(|| {
            PipelineError::UnknownMeasurement {
                measurement: group.measurement.clone(),
            }
        })?;

        let mut columns =
            Vec::with_capacity(2 + config.fields_as_columns.len() + config.tags_as_columns.len());
        columns.push(TIME_COLUMN.to_string());
        columns.push(DATA_COLUMN.to_string());
        columns.extend(config.fields_as_columns.iter().cloned());
        columns.extend(config.tags_as_columns.iter().cloned());

        let rows = group
            .points
            .iter()
            .map(|p| build_row(p, &config.fields_as_columns, &config.tags_as_columns))
            .collect();

        batches.push(ColumnarBatch {
            table: config.target_table.clone(),
            columns,
            rows,
        });
    }

    Ok(batches)
}

fn build_row(point: &Point, field_columns: &[String], tag_columns: &[String]) -> Vec<ColumnValue> {
    let mut data = Map::new();
    for (key, value) in point.tags() {
        if !tag_columns.contains(key) {
            data.insert(key.clone(), Value::String(value.clone()));
        }
    }
    for (key, value) in point.fields() {
        if !field_columns.contains(key) {
            data.insert(key.clone(), field_to_json(value));
        }
    }

    let mut row = Vec::with_capacity(2 + field_columns.len() + tag_columns.len());
    row.push(ColumnValue::Timestamp(point.timestamp()));
    row.push(ColumnValue::Json(Value::Object(data).to_string()));
    for column in field_columns {
        row.push(
            point
                .fields()
                .get(column)
                .map(ColumnValue::from)
                .unwrap_or(ColumnValue::Null),
        );
    }
    for column in tag_columns {
        row.push(
            point
                .tags()
                .get(column)
                .map(|v| ColumnValue::Text(v.clone()))
                .unwrap_or(ColumnValue::Null),
        );
    }
    row
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(v) => Value::from(*v),
        // NaN and infinities become null
        FieldValue::Float(v) => Value::from(*v),
        FieldValue::Text(v) => Value::String(v.clone()),
    }
}

/// An open transaction on a columnar store.
///
/// Dropping a transaction without committing must roll it back.
pub trait ColumnarTransaction: Send {
    /// Append `batch.rows` to `batch.table`, returning the inserted row count.
    fn append_rows(
        &mut self,
        batch: &ColumnarBatch,
    ) -> impl Future<Output = Result<u64, BackendError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// A columnar store able to open transactions.
pub trait ColumnarBackend: Send + Sync {
    type Transaction: ColumnarTransaction;

    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, BackendError>> + Send;
}

/// Columnar output bound to its backend.
pub struct ColumnarSink<B> {
    output: ColumnarOutput,
    backend: B,
}

impl<B: ColumnarBackend> ColumnarSink<B> {
    pub fn new(output: ColumnarOutput, backend: B) -> Self {
        Self { output, backend }
    }

    pub fn output(&self) -> &ColumnarOutput {
        &self.output
    }

    /// Write prepared groups in a single transaction.
    ///
    /// Returns the number of rows committed. Nothing is visible in the
    /// store unless every batch was appended in full.
    pub async fn write(&self, groups: &[PointGroup]) -> Result<usize, PipelineError> {
        let batches = build_batches(groups, &self.output)?;
        let total: usize = batches.iter().map(ColumnarBatch::len).sum();
        if total == 0 {
            return Ok(0);
        }

        let name = self.output.name();
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(|e| PipelineError::sink(name, e))?;

        for batch in batches.iter().filter(|b| !b.is_empty()) {
            let expected = batch.len() as u64;
            let outcome = match tx.append_rows(batch).await {
                Ok(actual) if actual == expected => Ok(()),
                Ok(actual) => Err(BackendError::RowCount { expected, actual }),
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("{}: rollback failed: {}", name, rollback_err);
                }
                return Err(PipelineError::sink(name, e));
            }
            debug!("{}: appended {} rows to '{}'", name, expected, batch.table);
        }

        tx.commit().await.map_err(|e| PipelineError::sink(name, e))?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnarMeasurement;
    use crate::error::ErrorKind;
    use crate::point::{Fields, Tags};
    use crate::sink::memory::MemoryColumnarBackend;

    fn metric(name: &str, tags: &[(&str, &str)], fields: &[(&str, FieldValue)]) -> Point {
        let tags: Tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let fields: Fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Point::new(name, tags, fields, DateTime::from_timestamp_nanos(1_600_000_000))
    }

    fn output() -> ColumnarOutput {
        ColumnarOutput::new("sql", ":memory:")
            .measurement(
                "metric",
                ColumnarMeasurement::new("metric_table")
                    .fields(["field1", "field2"])
                    .tags(["host", "state"]),
            )
            .measurement("other", ColumnarMeasurement::new("other_table"))
    }

    fn groups() -> Vec<PointGroup> {
        vec![
            PointGroup {
                measurement: "metric".into(),
                points: vec![
                    metric(
                        "metric",
                        &[("host", "h1"), ("state", "up"), ("warn", "warn_value")],
                        &[
                            ("field1", FieldValue::Integer(1)),
                            ("added_tag", FieldValue::Text("added_tag_value".into())),
                        ],
                    ),
                    metric("metric", &[("host", "h2")], &[("field2", FieldValue::Float(0.5))]),
                ],
            },
            PointGroup {
                measurement: "other".into(),
                points: vec![metric("other", &[], &[("v", FieldValue::Integer(3))])],
            },
        ]
    }

    #[test]
    fn test_row_layout() {
        let batches = build_batches(&groups(), &output()).unwrap();
        assert_eq!(batches.len(), 2);

        let batch = &batches[0];
        assert_eq!(batch.table, "metric_table");
        assert_eq!(
            batch.columns,
            vec!["time", "data", "field1", "field2", "host", "state"]
        );

        let row = &batch.rows[0];
        assert_eq!(
            row[0],
            ColumnValue::Timestamp(DateTime::from_timestamp_nanos(1_600_000_000))
        );
        let ColumnValue::Json(ref data) = row[1] else {
            panic!("data column is not JSON");
        };
        let data: Value = serde_json::from_str(data).unwrap();
        assert_eq!(
            data,
            serde_json::json!({"warn": "warn_value", "added_tag": "added_tag_value"})
        );
        assert_eq!(row[2], ColumnValue::Integer(1));
        assert_eq!(row[3], ColumnValue::Null);
        assert_eq!(row[4], ColumnValue::Text("h1".into()));
        assert_eq!(row[5], ColumnValue::Text("up".into()));

        let second = &batch.rows[1];
        assert_eq!(second[2], ColumnValue::Null);
        assert_eq!(second[3], ColumnValue::Float(0.5));
        assert_eq!(second[5], ColumnValue::Null);
    }

    #[test]
    fn test_field_wins_in_data_column() {
        let out = ColumnarOutput::new("sql", ":memory:")
            .measurement("m", ColumnarMeasurement::new("t"));
        let groups = vec![PointGroup {
            measurement: "m".into(),
            points: vec![metric(
                "m",
                &[("dup", "tag")],
                &[("dup", FieldValue::Integer(9))],
            )],
        }];

        let batches = build_batches(&groups, &out).unwrap();
        let ColumnValue::Json(ref data) = batches[0].rows[0][1] else {
            panic!("data column is not JSON");
        };
        assert_eq!(data, r#"{"dup":9}"#);
    }

    #[test]
    fn test_unknown_measurement() {
        let groups = vec![PointGroup {
            measurement: "nope".into(),
            points: vec![metric("nope", &[], &[("v", FieldValue::Integer(1))])],
        }];
        let err = build_batches(&groups, &output()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMeasurement);
    }

    #[tokio::test]
    async fn test_write_commits_all_batches() {
        let backend = MemoryColumnarBackend::new();
        let sink = ColumnarSink::new(output(), backend.clone());

        assert_eq!(sink.write(&groups()).await.unwrap(), 3);
        assert_eq!(backend.rows("metric_table").len(), 2);
        assert_eq!(backend.rows("other_table").len(), 1);
        assert_eq!(backend.commits(), 1);
        assert_eq!(backend.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_everything() {
        let backend = MemoryColumnarBackend::new();
        backend.fail_on_table("other_table");
        let sink = ColumnarSink::new(output(), backend.clone());

        let err = sink.write(&groups()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkWrite);
        assert!(backend.rows("metric_table").is_empty());
        assert_eq!(backend.commits(), 0);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_row_count_mismatch_rolls_back() {
        let backend = MemoryColumnarBackend::new();
        backend.set_short_write(true);
        let sink = ColumnarSink::new(output(), backend.clone());

        let err = sink.write(&groups()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SinkWrite {
                source: BackendError::RowCount { expected: 2, actual: 1 },
                ..
            }
        ));
        assert!(backend.rows("metric_table").is_empty());
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_empty_write_opens_no_transaction() {
        let backend = MemoryColumnarBackend::new();
        backend.set_closed(true);
        let sink = ColumnarSink::new(output(), backend.clone());

        assert_eq!(sink.write(&[]).await.unwrap(), 0);
        assert_eq!(backend.commits(), 0);
    }
}

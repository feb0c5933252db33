// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink.
//!
//! Points are written one at a time in group order. The first failing
//! point aborts the call; points already written stay written.

use crate::config::{OutputConfig, TimeSeriesOutput};
use crate::error::{BackendError, PipelineError};
use crate::point::{Point, PointGroup};
use parking_lot::Mutex;
use std::future::Future;
use tracing::debug;

/// Client able to write single points to a time-series store.
pub trait TimeSeriesClient: Send + Sync {
    fn write_point(&self, point: &Point) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Time-series output bound to its client.
pub struct TimeSeriesSink<C> {
    output: TimeSeriesOutput,
    client: C,
}

impl<C: TimeSeriesClient> TimeSeriesSink<C> {
    pub fn new(output: TimeSeriesOutput, client: C) -> Self {
        Self { output, client }
    }

    pub fn output(&self) -> &TimeSeriesOutput {
        &self.output
    }

    /// Write every point of every group. Returns the number written.
    pub async fn write(&self, groups: &[PointGroup]) -> Result<usize, PipelineError> {
        let mut written = 0;
        for group in groups {
            for point in &group.points {
                self.client
                    .write_point(point)
                    .await
                    .map_err(|e| PipelineError::sink(self.output.name(), e))?;
                written += 1;
            }
            debug!(
                "{}: wrote {} points for '{}'",
                self.output.name(),
                group.points.len(),
                group.measurement
            );
        }
        Ok(written)
    }
}

/// Recording client with failure injection, for tests.
#[derive(Debug, Default)]
pub struct MockTimeSeriesClient {
    written: Mutex<Vec<Point>>,
    fail_after: Mutex<Option<usize>>,
}

impl MockTimeSeriesClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` more points, then fail every write.
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.lock() = Some(self.written.lock().len() + count);
    }

    pub fn written(&self) -> Vec<Point> {
        self.written.lock().clone()
    }
}

impl TimeSeriesClient for MockTimeSeriesClient {
    async fn write_point(&self, point: &Point) -> Result<(), BackendError> {
        let limit = *self.fail_after.lock();
        let mut written = self.written.lock();
        if limit.is_some_and(|limit| written.len() >= limit) {
            return Err(BackendError::Status {
                status: 500,
                body: "mock write failure".into(),
            });
        }
        written.push(point.clone());
        Ok(())
    }
}

impl<C: TimeSeriesClient> TimeSeriesClient for std::sync::Arc<C> {
    fn write_point(&self, point: &Point) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).write_point(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::point::{FieldValue, Fields, Tags};
    use chrono::DateTime;
    use std::sync::Arc;

    fn groups() -> Vec<PointGroup> {
        let point = |m: &str, v: i64| {
            let mut fields = Fields::new();
            fields.insert("v".into(), FieldValue::Integer(v));
            Point::new(m, Tags::new(), fields, DateTime::from_timestamp_nanos(v))
        };
        vec![
            PointGroup {
                measurement: "a".into(),
                points: vec![point("a", 1), point("a", 2)],
            },
            PointGroup {
                measurement: "b".into(),
                points: vec![point("b", 3)],
            },
        ]
    }

    #[tokio::test]
    async fn test_writes_in_order() {
        let client = Arc::new(MockTimeSeriesClient::new());
        let sink = TimeSeriesSink::new(TimeSeriesOutput::new("ts", "http://x", "db"), client.clone());

        assert_eq!(sink.write(&groups()).await.unwrap(), 3);
        let measurements: Vec<String> = client
            .written()
            .iter()
            .map(|p| p.measurement().to_string())
            .collect();
        assert_eq!(measurements, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let client = Arc::new(MockTimeSeriesClient::new());
        client.fail_after(1);
        let sink = TimeSeriesSink::new(TimeSeriesOutput::new("ts", "http://x", "db"), client.clone());

        let err = sink.write(&groups()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkWrite);
        assert!(err.to_string().contains("ts"));
        assert_eq!(client.written().len(), 1);
    }
}

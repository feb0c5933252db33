// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Orchestrator: parse, group, then prepare and write per output.
//!
//! Outputs run in configuration order, columnar outputs first. A failure on
//! a `commit` output stops the run and is returned; a failure on a
//! `best-effort` output is collected in the [`WriteReport`] and the run
//! carries on. Preparation failures are per measurement group, so a
//! `best-effort` output still writes the groups that prepared cleanly.
//! Writes already done by earlier outputs are not undone.

use crate::config::{EnrichmentSet, OutputConfig, ReceiverConfig, WriteStrategy};
use crate::enrichment::EnrichmentCache;
use crate::error::{BackendError, ErrorKind, ParseError, PipelineError};
use crate::grouping::split_by_measurement;
use crate::line_protocol::LineProtocolParser;
use crate::pipeline::prepare_point_groups;
use crate::point::{Point, PointGroup};
use crate::sink::{
    ColumnarBackend, ColumnarSink, InfluxClient, SqliteBackend, TimeSeriesClient, TimeSeriesSink,
};
use crate::stats::InternalMetrics;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A failure attributed to one output.
#[derive(Debug, Error)]
#[error("output '{output}' failed: {error}")]
pub struct OutputFailure {
    pub output: String,
    #[source]
    pub error: PipelineError,
}

impl OutputFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Errors that fail a whole ingest request.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Output(#[from] OutputFailure),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Parse(_) => ErrorKind::Parse,
            IngestError::Output(failure) => failure.kind(),
        }
    }
}

/// Outcome of a successful run across all outputs.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Points handed to the run.
    pub points: usize,
    /// Points or rows written, summed over outputs.
    pub written: usize,
    /// Failures on best-effort outputs.
    pub non_critical: Vec<OutputFailure>,
}

/// The ingest pipeline bound to its outputs.
pub struct Receiver<C, T> {
    parser: LineProtocolParser,
    sets: Vec<EnrichmentSet>,
    cache: Arc<EnrichmentCache>,
    columnar: Vec<ColumnarSink<C>>,
    timeseries: Vec<TimeSeriesSink<T>>,
    metrics: InternalMetrics,
}

impl Receiver<SqliteBackend, InfluxClient> {
    /// Open every configured output.
    pub fn from_config(
        config: &ReceiverConfig,
        cache: Arc<EnrichmentCache>,
    ) -> Result<Self, BackendError> {
        let mut receiver = Receiver::new(
            config.enrichment.sets.clone(),
            cache,
            &config.internal_metrics_measurement,
        );

        for output in &config.columnar_outputs {
            let backend = SqliteBackend::open(&output.connection)?;
            info!("Columnar output '{}' -> {}", output.name, output.connection);
            receiver = receiver.with_columnar_sink(ColumnarSink::new(output.clone(), backend));
        }
        for output in &config.timeseries_outputs {
            let client = InfluxClient::new(output)?;
            info!(
                "Time-series output '{}' -> {} (v{})",
                output.name,
                client.write_url(),
                output.version
            );
            receiver = receiver.with_timeseries_sink(TimeSeriesSink::new(output.clone(), client));
        }

        Ok(receiver)
    }
}

impl<C: ColumnarBackend, T: TimeSeriesClient> Receiver<C, T> {
    pub fn new(
        sets: Vec<EnrichmentSet>,
        cache: Arc<EnrichmentCache>,
        internal_measurement: &str,
    ) -> Self {
        Self {
            parser: LineProtocolParser::new(),
            sets,
            cache,
            columnar: Vec::new(),
            timeseries: Vec::new(),
            metrics: InternalMetrics::new(internal_measurement),
        }
    }

    pub fn with_columnar_sink(mut self, sink: ColumnarSink<C>) -> Self {
        self.columnar.push(sink);
        self
    }

    pub fn with_timeseries_sink(mut self, sink: TimeSeriesSink<T>) -> Self {
        self.timeseries.push(sink);
        self
    }

    pub fn cache(&self) -> &Arc<EnrichmentCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &InternalMetrics {
        &self.metrics
    }

    /// Output names in execution order.
    pub fn output_names(&self) -> Vec<&str> {
        self.columnar
            .iter()
            .map(|s| s.output().name())
            .chain(self.timeseries.iter().map(|s| s.output().name()))
            .collect()
    }

    /// Handle one request payload.
    ///
    /// Counters are bumped only once the payload has parsed.
    pub async fn ingest(
        &self,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<WriteReport, IngestError> {
        let points = self.parser.parse(payload, now)?;
        self.metrics.counters().record(points.len(), payload.len());
        debug!("Parsed {} points from {} bytes", points.len(), payload.len());
        Ok(self.write_outputs(points).await?)
    }

    /// Send `points` through every output.
    pub async fn write_outputs(&self, points: Vec<Point>) -> Result<WriteReport, OutputFailure> {
        let mut report = WriteReport {
            points: points.len(),
            ..Default::default()
        };
        let groups = split_by_measurement(points);

        for sink in &self.columnar {
            let output = sink.output();
            let prepared = self.prepare(&groups, output, &mut report)?;
            let result = with_deadline(output, sink.write(&prepared)).await;
            record_write(output, result, &mut report)?;
        }

        for sink in &self.timeseries {
            let output = sink.output();
            let prepared = self.prepare(&groups, output, &mut report)?;
            let result = with_deadline(output, sink.write(&prepared)).await;
            record_write(output, result, &mut report)?;
        }

        Ok(report)
    }

    /// Send queued internal metrics, if any.
    pub async fn flush_internal_metrics(&self) -> Result<WriteReport, OutputFailure> {
        let pending = self.metrics.take_pending();
        if pending.is_empty() {
            return Ok(WriteReport::default());
        }
        self.write_outputs(pending).await
    }

    /// Prepare every group for `output`.
    ///
    /// On a `commit` output the first group error fails the run before
    /// anything is written. On a `best-effort` output each group error is
    /// reported and the remaining groups are still written.
    fn prepare(
        &self,
        groups: &[PointGroup],
        output: &dyn OutputConfig,
        report: &mut WriteReport,
    ) -> Result<Vec<PointGroup>, OutputFailure> {
        let prepared = prepare_point_groups(groups, output, &self.sets, &self.cache);
        for error in prepared.errors {
            record_failure(output, error, report)?;
        }
        Ok(prepared.groups)
    }
}

/// Bound a write by the output's deadline. A zero deadline waits forever.
async fn with_deadline<F>(output: &dyn OutputConfig, write: F) -> Result<usize, PipelineError>
where
    F: Future<Output = Result<usize, PipelineError>>,
{
    let deadline = output.write_timeout();
    if deadline.is_zero() {
        return write.await;
    }
    match tokio::time::timeout(deadline, write).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::sink(
            output.name(),
            BackendError::Timeout(deadline),
        )),
    }
}

fn record_write(
    output: &dyn OutputConfig,
    result: Result<usize, PipelineError>,
    report: &mut WriteReport,
) -> Result<(), OutputFailure> {
    match result {
        Ok(written) => {
            debug!("{}: {} written", output.name(), written);
            report.written += written;
            Ok(())
        }
        Err(error) => record_failure(output, error, report),
    }
}

/// Apply the output's write strategy to one failure.
fn record_failure(
    output: &dyn OutputConfig,
    error: PipelineError,
    report: &mut WriteReport,
) -> Result<(), OutputFailure> {
    let failure = OutputFailure {
        output: output.name().to_string(),
        error,
    };
    match output.write_strategy() {
        WriteStrategy::Commit => {
            error!("{}", failure);
            Err(failure)
        }
        WriteStrategy::BestEffort => {
            warn!("{}", failure);
            report.non_critical.push(failure);
            Ok(())
        }
    }
}

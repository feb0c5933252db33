// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the ingest pipeline.

use std::time::Duration;
use thiserror::Error;

/// A malformed wire-format line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line number within the payload.
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Failures reported by a sink collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inserted {actual} rows, expected {expected}")]
    RowCount { expected: u64, actual: u64 },

    #[error("write did not complete within {0:?}")]
    Timeout(Duration),

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("backend closed")]
    Closed,
}

/// Failures reported by the enrichment source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Pipeline error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    UnknownMeasurement,
    UnknownEnrichmentSet,
    EnrichmentCacheInvalid,
    SinkWrite,
}

/// Errors raised while preparing or writing points.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("no measurement config for '{measurement}'")]
    UnknownMeasurement { measurement: String },

    #[error("enrichment set '{name}' is not configured")]
    UnknownEnrichmentSet { name: String },

    #[error("enrichment cache is invalid, cannot enrich with set '{set}'")]
    EnrichmentCacheInvalid { set: String },

    #[error("write to {sink} failed: {source}")]
    SinkWrite {
        sink: String,
        #[source]
        source: BackendError,
    },
}

impl PipelineError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Parse(_) => ErrorKind::Parse,
            PipelineError::UnknownMeasurement { .. } => ErrorKind::UnknownMeasurement,
            PipelineError::UnknownEnrichmentSet { .. } => ErrorKind::UnknownEnrichmentSet,
            PipelineError::EnrichmentCacheInvalid { .. } => ErrorKind::EnrichmentCacheInvalid,
            PipelineError::SinkWrite { .. } => ErrorKind::SinkWrite,
        }
    }

    pub(crate) fn sink(sink: impl Into<String>, source: BackendError) -> Self {
        PipelineError::SinkWrite {
            sink: sink.into(),
            source,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics Receiver
//!
//! Ingests batches of line-protocol metrics, enriches their tags from an
//! externally sourced attribute cache, and routes them to one or more
//! storage outputs.
//!
//! This crate provides:
//! - A line-protocol parser with escape and quoted-value handling
//! - A concurrently read, periodically refreshed enrichment cache
//! - Per-output tag filtering, enrichment and static tag overlay
//! - A transactional columnar sink (SQLite backend) and an InfluxDB sink
//! - `commit` / `best-effort` write strategies per output
//!
//! # Overview
//!
//! ```text
//! payload --> LineProtocolParser --> split_by_measurement --+--> prepare_point_groups --> ColumnarSink
//!                                                           |
//!                                                           +--> prepare_point_groups --> TimeSeriesSink
//!                                                                        ^
//!                                                           EnrichmentCache <-- EnrichmentRefresher <-- TraitSource
//! ```

pub mod config;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod grouping;
pub mod line_protocol;
pub mod pipeline;
pub mod point;
pub mod receiver;
pub mod sink;
pub mod stats;

pub use config::{
    ColumnarMeasurement, ColumnarOutput, ConfigError, EnrichmentConfig, EnrichmentSet,
    MeasurementConfig, OutputConfig, ReceiverConfig, TimeSeriesOutput, WriteStrategy,
};
pub use enrichment::{EnrichmentCache, EnrichmentRefresher, OmnikeeperClient, TraitSource};
pub use error::{BackendError, ErrorKind, ParseError, PipelineError, SourceError};
pub use line_protocol::{encode_point, LineProtocolParser};
pub use pipeline::{prepare_point_groups, PreparedGroups};
pub use point::{FieldValue, Fields, Point, PointGroup, Tags};
pub use receiver::{IngestError, OutputFailure, Receiver, WriteReport};
pub use sink::{ColumnarSink, InfluxClient, SqliteBackend, TimeSeriesSink};
pub use stats::{IngestCounters, InternalMetrics};

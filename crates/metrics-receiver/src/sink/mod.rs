// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage sinks.
//!
//! | Sink              | Backend trait        | Implementations                                 |
//! |-------------------|----------------------|-------------------------------------------------|
//! | [`ColumnarSink`]   | [`ColumnarBackend`]   | [`SqliteBackend`], [`MemoryColumnarBackend`]     |
//! | [`TimeSeriesSink`] | [`TimeSeriesClient`]  | [`InfluxClient`], [`MockTimeSeriesClient`]       |

pub mod columnar;
pub mod influx;
pub mod memory;
pub mod sqlite;
pub mod timeseries;

pub use columnar::{
    build_batches, ColumnValue, ColumnarBackend, ColumnarBatch, ColumnarSink, ColumnarTransaction,
};
pub use influx::InfluxClient;
pub use memory::MemoryColumnarBackend;
pub use sqlite::SqliteBackend;
pub use timeseries::{MockTimeSeriesClient, TimeSeriesClient, TimeSeriesSink};

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Internal self-metrics.
//!
//! Request handlers bump [`IngestCounters`]; a collect task periodically
//! drains them into a point queued on [`InternalMetrics`], and a flush task
//! sends the queued points through the regular output path.

use crate::point::{FieldValue, Fields, Point, Tags};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Counter values accumulated since the last drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub messages: u64,
    pub lines: u64,
    pub bytes: u64,
}

/// Ingest counters shared by all request handlers.
#[derive(Debug, Default)]
pub struct IngestCounters {
    inner: Mutex<CounterSnapshot>,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one accepted request carrying `lines` points in `bytes` bytes.
    pub fn record(&self, lines: usize, bytes: usize) {
        let mut c = self.inner.lock();
        c.messages += 1;
        c.lines += lines as u64;
        c.bytes += bytes as u64;
    }

    /// Current values, without resetting.
    pub fn snapshot(&self) -> CounterSnapshot {
        *self.inner.lock()
    }

    /// Take the current values and reset to zero.
    pub fn drain(&self) -> CounterSnapshot {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Collected self-metric points waiting to be flushed.
#[derive(Debug)]
pub struct InternalMetrics {
    measurement: String,
    counters: IngestCounters,
    pending: Mutex<Vec<Point>>,
}

impl InternalMetrics {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            counters: IngestCounters::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn counters(&self) -> &IngestCounters {
        &self.counters
    }

    /// Drain the counters into one point stamped `now` and queue it.
    pub fn collect(&self, now: DateTime<Utc>) -> Point {
        let snapshot = self.counters.drain();

        let mut fields = Fields::new();
        fields.insert(
            "received_messages".into(),
            FieldValue::Integer(saturating_i64(snapshot.messages)),
        );
        fields.insert(
            "received_lines".into(),
            FieldValue::Integer(saturating_i64(snapshot.lines)),
        );
        fields.insert(
            "received_bytes".into(),
            FieldValue::Integer(saturating_i64(snapshot.bytes)),
        );

        let point = Point::new(self.measurement.clone(), Tags::new(), fields, now);
        self.pending.lock().push(point.clone());
        point
    }

    /// Take every queued point.
    pub fn take_pending(&self) -> Vec<Point> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_and_drain() {
        let counters = IngestCounters::new();
        counters.record(3, 120);
        counters.record(2, 80);

        assert_eq!(
            counters.drain(),
            CounterSnapshot {
                messages: 2,
                lines: 5,
                bytes: 200
            }
        );
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let counters = Arc::new(IngestCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record(1, 10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = counters.drain();
        assert_eq!(snapshot.messages, 8000);
        assert_eq!(snapshot.lines, 8000);
        assert_eq!(snapshot.bytes, 80_000);
    }

    #[test]
    fn test_collect_queues_point() {
        let metrics = InternalMetrics::new("metrics_receiver");
        metrics.counters().record(4, 64);
        let now = Utc::now();

        let point = metrics.collect(now);
        assert_eq!(point.measurement(), "metrics_receiver");
        assert!(point.tags().is_empty());
        assert_eq!(point.timestamp(), now);
        assert_eq!(point.fields()["received_messages"], FieldValue::Integer(1));
        assert_eq!(point.fields()["received_lines"], FieldValue::Integer(4));
        assert_eq!(point.fields()["received_bytes"], FieldValue::Integer(64));

        metrics.collect(now);
        assert_eq!(metrics.pending_len(), 2);

        let pending = metrics.take_pending();
        assert_eq!(pending[1].fields()["received_messages"], FieldValue::Integer(0));
        assert_eq!(metrics.pending_len(), 0);
    }
}

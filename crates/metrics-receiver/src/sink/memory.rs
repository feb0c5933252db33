// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory columnar backend with failure injection, for tests.

use super::columnar::{ColumnValue, ColumnarBackend, ColumnarBatch, ColumnarTransaction};
use crate::error::BackendError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    committed: Mutex<Vec<ColumnarBatch>>,
    fail_table: Mutex<Option<String>>,
    append_delay: Mutex<Option<Duration>>,
    short_write: AtomicBool,
    closed: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Columnar store kept in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryColumnarBackend {
    state: Arc<MemoryState>,
}

impl MemoryColumnarBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append to `table`.
    pub fn fail_on_table(&self, table: impl Into<String>) {
        *self.state.fail_table.lock() = Some(table.into());
    }

    /// Report one row fewer than appended.
    pub fn set_short_write(&self, enabled: bool) {
        self.state.short_write.store(enabled, Ordering::SeqCst);
    }

    /// Refuse new transactions.
    pub fn set_closed(&self, closed: bool) {
        self.state.closed.store(closed, Ordering::SeqCst);
    }

    /// Sleep before every append.
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        *self.state.append_delay.lock() = delay;
    }

    /// Committed rows for `table`, in commit order.
    pub fn rows(&self, table: &str) -> Vec<Vec<ColumnValue>> {
        self.state
            .committed
            .lock()
            .iter()
            .filter(|b| b.table == table)
            .flat_map(|b| b.rows.iter().cloned())
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

impl ColumnarBackend for MemoryColumnarBackend {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, BackendError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            finished: false,
        })
    }
}

/// Staged batches, published on commit.
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<MemoryState>,
    staged: Vec<ColumnarBatch>,
    finished: bool,
}

impl ColumnarTransaction for MemoryTransaction {
    async fn append_rows(&mut self, batch: &ColumnarBatch) -> Result<u64, BackendError> {
        let delay = *self.state.append_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_table.lock().as_deref() == Some(batch.table.as_str()) {
            return Err(BackendError::Encode(format!(
                "table '{}' rejected the batch",
                batch.table
            )));
        }

        self.staged.push(batch.clone());
        let appended = batch.rows.len() as u64;
        if self.state.short_write.load(Ordering::SeqCst) {
            Ok(appended.saturating_sub(1))
        } else {
            Ok(appended)
        }
    }

    async fn commit(mut self) -> Result<(), BackendError> {
        let staged = std::mem::take(&mut self.staged);
        self.state.committed.lock().extend(staged);
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), BackendError> {
        self.staged.clear();
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

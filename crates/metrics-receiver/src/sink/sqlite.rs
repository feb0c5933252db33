// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite columnar backend
//!
//! Target tables must exist beforehand. The `time` column is stored as
//! RFC 3339 text with nanosecond precision and `data` as JSON text, so a
//! table like the following accepts rows for a measurement projecting
//! field `usage` and tag `host`:
//!
//! ```sql
//! CREATE TABLE cpu_metrics (
//!     time TEXT NOT NULL,
//!     data TEXT NOT NULL,
//!     usage REAL,
//!     host TEXT
//! );
//! ```
//!
//! The connection is not `Sync`; it sits behind an async mutex that a
//! transaction holds until it commits, rolls back or is dropped. Statements
//! run on the blocking pool so a slow disk never stalls the runtime.

use super::columnar::{ColumnValue, ColumnarBackend, ColumnarBatch, ColumnarTransaction};
use crate::error::BackendError;
use chrono::SecondsFormat;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

impl ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ColumnValue::Null => ToSqlOutput::Owned(Value::Null),
            ColumnValue::Timestamp(ts) => {
                ToSqlOutput::Owned(Value::Text(ts.to_rfc3339_opts(SecondsFormat::Nanos, true)))
            }
            ColumnValue::Json(s) | ColumnValue::Text(s) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            ColumnValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            ColumnValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
        })
    }
}

/// SQLite database used as a columnar store.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub fn open(path: &str) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("Opened SQLite database at {}", path);
        Ok(Self::from_connection(conn))
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run statements outside any sink transaction (schema setup).
    pub async fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        self.conn.lock().await.execute_batch(sql)?;
        Ok(())
    }

    /// Run `f` against the connection.
    pub async fn with_connection<R, F>(&self, f: F) -> Result<R, BackendError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R>,
    {
        let conn = self.conn.lock().await;
        Ok(f(&conn)?)
    }
}

impl ColumnarBackend for SqliteBackend {
    type Transaction = SqliteTransaction;

    async fn begin(&self) -> Result<SqliteTransaction, BackendError> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        let mut tx = SqliteTransaction {
            conn: Some(conn),
            finished: false,
        };
        let started = tx
            .run(|conn| {
                // A write cancelled mid-statement leaves its transaction open
                if !conn.is_autocommit() {
                    warn!("Rolling back transaction left open by a cancelled write");
                    conn.execute_batch("ROLLBACK")?;
                }
                conn.execute_batch("BEGIN")
            })
            .await;
        if let Err(e) = started {
            tx.finished = true;
            return Err(e);
        }
        Ok(tx)
    }
}

/// Open SQLite transaction. Rolled back on drop unless committed.
pub struct SqliteTransaction {
    /// `None` while a statement runs on the blocking pool.
    conn: Option<OwnedMutexGuard<Connection>>,
    finished: bool,
}

impl SqliteTransaction {
    /// Run `f` against the connection on the blocking pool.
    async fn run<R, F>(&mut self, f: F) -> Result<R, BackendError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        let conn = self.conn.take().ok_or(BackendError::Closed)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (conn, result)
        })
        .await?;
        self.conn = Some(conn);
        Ok(result?)
    }
}

impl ColumnarTransaction for SqliteTransaction {
    async fn append_rows(&mut self, batch: &ColumnarBatch) -> Result<u64, BackendError> {
        let batch = batch.clone();
        self.run(move |conn| {
            let sql = insert_statement(&batch);
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut inserted = 0u64;
            for row in &batch.rows {
                inserted += stmt.execute(rusqlite::params_from_iter(row.iter()))? as u64;
            }
            Ok(inserted)
        })
        .await
    }

    async fn commit(mut self) -> Result<(), BackendError> {
        self.run(|conn| conn.execute_batch("COMMIT")).await?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), BackendError> {
        self.finished = true;
        self.run(|conn| conn.execute_batch("ROLLBACK")).await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = &self.conn {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("SQLite rollback on drop failed: {}", e);
            }
        }
    }
}

fn insert_statement(batch: &ColumnarBatch) -> String {
    let columns: Vec<String> = batch.columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=batch.columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&batch.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitoring persistence.
//!
//! The store is written against the narrow [`Db`] handle the deployment
//! injects (`exec` / `escape` / `query`); the sqlite implementation ships
//! in-tree. One row per measurement, keyed `(hid, last_mon_time)`, with
//! time-bounded retention enforced by the sweeper.

use std::path::Path;
use std::sync::Arc;

use hm_core::xml::XmlError;
use hm_core::{ErrorKind, XmlNode};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("monitoring body is not valid XML: {0}")]
    InvalidBody(#[from] XmlError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Db(_) => ErrorKind::Transient,
            StoreError::InvalidBody(_) => ErrorKind::Protocol,
        }
    }
}

/// The injected SQL handle. Implementations serialize access internally;
/// `exec` and `query` are safe to call from any task.
pub trait Db: Send + Sync {
    fn exec(&self, sql: &str) -> Result<(), StoreError>;

    /// Escape a string for embedding in a single-quoted SQL literal.
    fn escape(&self, value: &str) -> String;

    fn query(&self, sql: &str) -> Result<Vec<Vec<String>>, StoreError>;
}

/// Sqlite-backed [`Db`].
pub struct SqliteDb {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self { conn: Mutex::new(rusqlite::Connection::open(path)?) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { conn: Mutex::new(rusqlite::Connection::open_in_memory()?) })
    }
}

impl Db for SqliteDb {
    fn exec(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn escape(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn query(&self, sql: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(columns);
            for i in 0..columns {
                let value: rusqlite::types::Value = row.get(i)?;
                record.push(match value {
                    rusqlite::types::Value::Null => String::new(),
                    rusqlite::types::Value::Integer(v) => v.to_string(),
                    rusqlite::types::Value::Real(v) => v.to_string(),
                    rusqlite::types::Value::Text(v) => v,
                    rusqlite::types::Value::Blob(v) => String::from_utf8_lossy(&v).into_owned(),
                });
            }
            out.push(record);
        }

        Ok(out)
    }
}

const MONITOR_TABLE: &str = "host_monitoring";

const BOOTSTRAP_DDL: &str = "CREATE TABLE IF NOT EXISTS host_monitoring \
     (hid INTEGER, last_mon_time INTEGER, body TEXT, PRIMARY KEY(hid, last_mon_time))";

/// Append-on-measurement write path with retention.
///
/// `expiration` carries the configured `monitor_expiration`: positive
/// bounds row age in seconds, zero keeps rows forever, negative disables
/// persistence entirely.
pub struct MonitoringStore {
    db: Arc<dyn Db>,
    expiration: i64,
}

impl MonitoringStore {
    pub fn new(db: Arc<dyn Db>, expiration: i64) -> Result<Self, StoreError> {
        db.exec(BOOTSTRAP_DDL)?;
        Ok(Self { db, expiration })
    }

    /// Record one measurement. Last write for a `(hid, timestamp)` pair
    /// wins (REPLACE semantics).
    pub fn write(&self, oid: i32, timestamp: u64, body: &str) -> Result<(), StoreError> {
        if self.expiration < 0 {
            return Ok(());
        }

        XmlNode::parse(body)?;

        let sql = format!(
            "REPLACE INTO {MONITOR_TABLE} (hid, last_mon_time, body) \
             VALUES ({oid}, {timestamp}, '{}')",
            self.db.escape(body)
        );
        self.db.exec(&sql)
    }

    /// Delete rows older than the retention window.
    pub fn clean_expired(&self, now: u64) -> Result<(), StoreError> {
        if self.expiration <= 0 {
            return Ok(());
        }

        let cutoff = now.saturating_sub(self.expiration as u64);
        self.db.exec(&format!("DELETE FROM {MONITOR_TABLE} WHERE last_mon_time < {cutoff}"))
    }

    /// Administrative purge.
    pub fn clean_all(&self) -> Result<(), StoreError> {
        self.db.exec(&format!("DELETE FROM {MONITOR_TABLE}"))
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;

//! SQLite database store implementation.

use rusqlite::{params, Connection, ErrorCode, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
///
/// `Constraint` is kept distinct from the generic SQLite error because a
/// unique-timestamp violation at commit time means "already delivered", not
/// "server broken", and the web layer maps the two differently.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unique timestamp constraint violated")]
    Constraint,
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage operation timed out")]
    Timeout,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("migration error: {0}")]
    Migration(String),
}

impl DbError {
    /// Transient failures are worth a client-side retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Timeout | DbError::Unavailable(_))
    }
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    /// Persist a batch of entries as a single transaction.
    ///
    /// Either every entry lands or none does. A unique-index violation on
    /// any row aborts the whole transaction and surfaces as
    /// `DbError::Constraint`.
    pub fn insert_batch(&self, entries: &[MetricBatchEntry]) -> Result<usize, DbError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO metric_logs (timestamp, schema_version, network_quality, speedtest, \
                 ping_results, curl_results, dns_results, mtr_results) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for entry in entries {
                stmt.execute(params![
                    entry.storage_key(),
                    SCHEMA_VERSION,
                    serde_json::to_string(&entry.network_quality)?,
                    serde_json::to_string(&entry.speedtest)?,
                    serde_json::to_string(&entry.ping_results)?,
                    serde_json::to_string(&entry.curl_results)?,
                    serde_json::to_string(&entry.dns_results)?,
                    serde_json::to_string(&entry.mtr_results)?,
                ])
                .map_err(map_constraint)?;
            }
        }

        tx.commit()?;
        Ok(entries.len())
    }

    /// Check whether a timestamp key is already persisted.
    pub fn timestamp_exists(&self, key: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metric_logs WHERE timestamp = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fetch the most recent `limit` entries, newest first.
    pub fn recent(&self, limit: i64) -> Result<Vec<StoredEntry>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, schema_version, network_quality, speedtest, \
             ping_results, curl_results, dns_results, mtr_results \
             FROM metric_logs ORDER BY timestamp DESC LIMIT ?1",
        )?;

        let raw_rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(raw_rows.len());
        for (timestamp, schema_version, nq, st, ping, curl, dns, mtr) in raw_rows {
            entries.push(StoredEntry {
                timestamp,
                schema_version,
                network_quality: serde_json::from_str(&nq)?,
                speedtest: serde_json::from_str(&st)?,
                ping_results: serde_json::from_str(&ping)?,
                curl_results: serde_json::from_str(&curl)?,
                dns_results: serde_json::from_str(&dns)?,
                mtr_results: serde_json::from_str(&mtr)?,
            });
        }

        Ok(entries)
    }

    /// Count all persisted entries.
    pub fn count(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM metric_logs", [], |r| r.get(0))?)
    }

    /// Liveness check: a trivial query against the live connection.
    pub fn health_check(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Map a SQLite unique/constraint failure to the dedicated variant.
fn map_constraint(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint
        }
        _ => DbError::Sqlite(e),
    }
}

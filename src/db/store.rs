//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Insert a new target and assign its ID.
    pub fn add_target(&self, target: &mut TargetConfig) -> Result<TargetId, DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO targets (name, address, port, probe_kind, interval_ms, max_consecutive_failures) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.name,
                target.address,
                target.port,
                target.probe_kind.as_str(),
                target.interval_ms as i64,
                target.max_consecutive_failures,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &TargetConfig) -> Result<(), DbError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE targets SET name=?1, address=?2, port=?3, probe_kind=?4, interval_ms=?5, max_consecutive_failures=?6 WHERE id=?7",
            params![
                target.name,
                target.address,
                target.port,
                target.probe_kind.as_str(),
                target.interval_ms as i64,
                target.max_consecutive_failures,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all stored targets ordered by ID, without checking their values.
    pub fn get_targets(&self) -> Result<Vec<StoredTarget>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, port, probe_kind, interval_ms, max_consecutive_failures FROM targets ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], StoredTarget::from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// Delete a target. Deleting a missing ID is not an error.
    pub fn delete_target(&self, id: TargetId) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Failure log ---

    /// Append a failure and trim the log to the newest `capacity` rows.
    pub fn append_failure(&self, entry: &FailureLogEntry, capacity: usize) -> Result<(), DbError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO failure_log (time, target_name, address, port) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.time.format(TIME_FORMAT).to_string(),
                entry.target_name,
                entry.address,
                entry.port,
            ],
        )?;
        tx.execute(
            "DELETE FROM failure_log WHERE id NOT IN (SELECT id FROM failure_log ORDER BY id DESC LIMIT ?1)",
            params![capacity as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Get the failure log, oldest first.
    pub fn get_failures(&self) -> Result<Vec<FailureLogEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT time, target_name, address, port FROM failure_log ORDER BY id ASC",
        )?;

        let entries = stmt
            .query_map([], |row| {
                let time_str: String = row.get(0)?;
                let time = parse_db_time(&time_str).unwrap_or_else(Utc::now);
                Ok(FailureLogEntry {
                    time,
                    target_name: row.get(1)?,
                    address: row.get(2)?,
                    port: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }

    /// Delete every failure log entry.
    pub fn clear_failures(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute("DELETE FROM failure_log", [])?;
        Ok(())
    }
}

/// A target row as stored. Values are range-checked by the registry.
#[derive(Debug, Clone)]
pub struct StoredTarget {
    pub id: TargetId,
    pub name: String,
    pub address: String,
    pub port: i64,
    pub probe_kind: String,
    pub interval_ms: i64,
    pub max_consecutive_failures: i64,
}

impl StoredTarget {
    fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            port: row.get(3)?,
            probe_kind: row.get(4)?,
            interval_ms: row.get(5)?,
            max_consecutive_failures: row.get(6)?,
        })
    }

    /// The stored fields as an unvalidated draft. Fails on an unknown probe kind.
    pub fn draft(&self) -> Result<TargetDraft, String> {
        Ok(TargetDraft {
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            probe_kind: self.probe_kind.parse()?,
            interval_ms: self.interval_ms,
            max_consecutive_failures: self.max_consecutive_failures,
        })
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

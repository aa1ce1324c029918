//! SQLite store for sessions and movements.
//!
//! Schema:
//!   sessions(id PK autoincrement, name TEXT, entry_time TIMESTAMP, exit_time TIMESTAMP NULL)
//!   movements(id PK autoincrement, session_id FK -> sessions.id, timestamp TIMESTAMP, area TEXT)
//!
//! Writes go through a [`Batch`], which commits all of its statements as one
//! transaction or none of them.

use chrono::{DateTime, Utc};
use presence_core::UNKNOWN_NAME;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Primary key of a row in `sessions`.
pub type SessionId = i64;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        entry_time TIMESTAMP,
        exit_time TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS movements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER,
        timestamp TIMESTAMP,
        area TEXT,
        FOREIGN KEY(session_id) REFERENCES sessions(id)
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(exit_time);
    CREATE INDEX IF NOT EXISTS idx_movements_session ON movements(session_id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// A row from `sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }
}

/// A row from `movements`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementRecord {
    pub id: i64,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub area: String,
}

/// Handle to the durable session/movement store.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.bootstrap()?;
        tracing::info!(path = %path.display(), "opened session store");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.bootstrap()?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn bootstrap(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Start an atomic write batch.
    pub fn begin(&mut self) -> Result<Batch<'_>, StoreError> {
        Ok(Batch {
            tx: self.conn.transaction()?,
        })
    }

    pub fn session(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, name, entry_time, exit_time FROM sessions WHERE id = ?1",
                params![id],
                map_session,
            )
            .optional()?;
        Ok(record)
    }

    /// Sessions, newest first. `open_only` restricts to sessions without an exit time.
    pub fn sessions(&self, open_only: bool, limit: usize) -> Result<Vec<SessionRecord>, StoreError> {
        let sql = if open_only {
            "SELECT id, name, entry_time, exit_time FROM sessions
             WHERE exit_time IS NULL ORDER BY id DESC LIMIT ?1"
        } else {
            "SELECT id, name, entry_time, exit_time FROM sessions ORDER BY id DESC LIMIT ?1"
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit], map_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Movements of one session in insertion order.
    pub fn movements(&self, session_id: SessionId) -> Result<Vec<MovementRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, timestamp, area FROM movements
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(MovementRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
                area: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn open_session_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE exit_time IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    pub fn session_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        entry_time: row.get(2)?,
        exit_time: row.get(3)?,
    })
}

/// A set of writes committed together. Dropping without `commit` rolls back.
pub struct Batch<'conn> {
    tx: Transaction<'conn>,
}

impl Batch<'_> {
    pub fn insert_session(&self, name: &str, entry_time: DateTime<Utc>) -> Result<SessionId, StoreError> {
        self.tx.execute(
            "INSERT INTO sessions (name, entry_time) VALUES (?1, ?2)",
            params![name, entry_time],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Set `exit_time` unless already set. Returns `false` when nothing changed.
    pub fn close_session(&self, id: SessionId, exit_time: DateTime<Utc>) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE sessions SET exit_time = ?1 WHERE id = ?2 AND exit_time IS NULL",
            params![exit_time, id],
        )?;
        Ok(changed > 0)
    }

    /// Name a session that is still unnamed ("Unknown"). Returns `false` when
    /// the session is missing or already carries a name.
    pub fn name_session(&self, id: SessionId, name: &str) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE sessions SET name = ?1 WHERE id = ?2 AND (name IS NULL OR name = ?3)",
            params![name, id, UNKNOWN_NAME],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_movement(
        &self,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        area: &str,
    ) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO movements (session_id, timestamp, area) VALUES (?1, ?2, ?3)",
            params![session_id, timestamp, area],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Close every session that still has no exit time. Returns how many were closed.
    pub fn close_all_open(&self, exit_time: DateTime<Utc>) -> Result<usize, StoreError> {
        let changed = self.tx.execute(
            "UPDATE sessions SET exit_time = ?1 WHERE exit_time IS NULL",
            params![exit_time],
        )?;
        Ok(changed)
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

//! `SQLite` backend.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memory_entries (
//!     id         TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! CREATE TABLE IF NOT EXISTS conversation_turns (
//!     id         TEXT PRIMARY KEY,
//!     session_id TEXT NOT NULL,
//!     data       BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! Rows hold JSON so the schema stays stable when entry fields change.
//! A SHA-256 checksum of the blob is stored when enabled. A row whose blob no
//! longer matches its checksum is reported as malformed on read.
//! Timestamps are stored as fixed-width RFC 3339 UTC so they sort as text.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{MemoryBackend, ScannedEntry};
use crate::config::PersistenceConfig;
use crate::conversation::ConversationTurn;
use crate::error::{RecallError, Result};
use crate::memory::MemoryEntry;
use crate::types::{MemoryId, SessionId, TurnId};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS memory_entries (
        id         TEXT PRIMARY KEY,
        data       BLOB NOT NULL,
        created_at TEXT NOT NULL,
        checksum   TEXT
    );
    CREATE TABLE IF NOT EXISTS conversation_turns (
        id         TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        data       BLOB NOT NULL,
        created_at TEXT NOT NULL,
        checksum   TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_turns_session ON conversation_turns(session_id);
";

fn checksum_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Handle to an `SQLite` database holding entries and turns.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    checksum_enabled: bool,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("checksum_enabled", &self.checksum_enabled)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on `SQLite` failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Recall persistence opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on `SQLite` failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Copy the database to `dest_path` with `SQLite`'s online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on `SQLite` failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Run `PRAGMA integrity_check`. `Ok(false)` means corruption.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> Result<(Vec<u8>, Option<String>)> {
        let json = serde_json::to_vec(value).map_err(|e| RecallError::Serialization(e.to_string()))?;
        let checksum = self.checksum_enabled.then(|| checksum_hex(&json));
        Ok((json, checksum))
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        data: &[u8],
        stored_checksum: Option<&str>,
    ) -> Result<T> {
        if self.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = checksum_hex(data);
                if expected != actual {
                    warn!(key, expected, actual = %actual, "Checksum mismatch, possible corruption");
                    return Err(RecallError::MalformedEntry {
                        key: key.to_string(),
                        reason: "checksum mismatch".into(),
                    });
                }
            }
        }
        serde_json::from_slice(data).map_err(|e| RecallError::MalformedEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl MemoryBackend for SqliteBackend {
    fn put_entry(&self, entry: &MemoryEntry) -> Result<()> {
        let (json, checksum) = self.encode(entry)?;
        self.conn.lock().execute(
            "INSERT INTO memory_entries (id, data, created_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                checksum = excluded.checksum",
            params![entry.id.to_string(), json, timestamp(&entry.created_at), checksum],
        )?;
        debug!(entry = %entry.id, bytes = json.len(), "Saved memory entry");
        Ok(())
    }

    fn get_entry(&self, id: MemoryId) -> Result<Option<MemoryEntry>> {
        let key = id.to_string();
        let row: Option<(Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT data, checksum FROM memory_entries WHERE id = ?1")?;
            stmt.query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
        };
        row.map(|(data, checksum)| self.decode(&key, &data, checksum.as_deref()))
            .transpose()
    }

    fn scan_entries(&self) -> Result<Vec<ScannedEntry>> {
        let start = Instant::now();
        let rows: Vec<(String, Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached("SELECT id, data, checksum FROM memory_entries")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let scanned: Vec<ScannedEntry> = rows
            .into_iter()
            .map(|(key, data, checksum)| {
                let entry = self.decode(&key, &data, checksum.as_deref());
                ScannedEntry { key, entry }
            })
            .collect();

        debug!(
            rows = scanned.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Scanned memory entries"
        );
        Ok(scanned)
    }

    fn delete_entry(&self, id: MemoryId) -> Result<bool> {
        self.delete_key(&id.to_string())
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM memory_entries WHERE id = ?1", params![key])?;
        Ok(deleted > 0)
    }

    fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM memory_entries", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn put_turn(&self, turn: &ConversationTurn) -> Result<()> {
        let (json, checksum) = self.encode(turn)?;
        self.conn.lock().execute(
            "INSERT INTO conversation_turns (id, session_id, data, created_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                checksum = excluded.checksum",
            params![
                turn.id.to_string(),
                turn.session_id.to_string(),
                json,
                timestamp(&turn.timestamp),
                checksum
            ],
        )?;
        Ok(())
    }

    fn get_turn(&self, id: TurnId) -> Result<Option<ConversationTurn>> {
        let key = id.to_string();
        let row: Option<(Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT data, checksum FROM conversation_turns WHERE id = ?1")?;
            stmt.query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
        };
        row.map(|(data, checksum)| self.decode(&key, &data, checksum.as_deref()))
            .transpose()
    }

    fn session_turns(&self, session: SessionId) -> Result<Vec<ConversationTurn>> {
        let rows: Vec<(String, Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT id, data, checksum FROM conversation_turns
                 WHERE session_id = ?1 ORDER BY created_at",
            )?;
            let mapped = stmt.query_map(params![session.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut turns = Vec::with_capacity(rows.len());
        for (key, data, checksum) in rows {
            match self.decode(&key, &data, checksum.as_deref()) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable turn"),
            }
        }
        Ok(turns)
    }

    fn delete_turn(&self, id: TurnId) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM conversation_turns WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    fn delete_turns_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM conversation_turns WHERE created_at < ?1",
            params![timestamp(&cutoff)],
        )?;
        Ok(deleted)
    }
}

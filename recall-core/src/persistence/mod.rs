//! Storage for memory entries and conversation turns.
//!
//! The [`MemoryBackend`] trait is the only thing the memory store and the
//! conversation log depend on. Two implementations ship with the crate:
//!
//! - [`InMemoryBackend`]: hash maps behind `RwLock`s, for tests and
//!   ephemeral deployments.
//! - [`SqliteBackend`]: one JSON blob per row in a WAL-mode `SQLite`
//!   database, with per-row checksums.
//!
//! Scans return one [`ScannedEntry`] per stored row so that a single
//! undecodable row is reported to the caller instead of failing the scan.

mod sqlite;

pub use sqlite::SqliteBackend;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::PersistenceConfig;
use crate::conversation::ConversationTurn;
use crate::error::{RecallError, Result};
use crate::memory::MemoryEntry;
use crate::types::{MemoryId, SessionId, TurnId};

/// One row produced by [`MemoryBackend::scan_entries`].
#[derive(Debug)]
pub struct ScannedEntry {
    /// Storage key of the row.
    pub key: String,
    /// The decoded entry, or why it could not be decoded.
    pub entry: Result<MemoryEntry>,
}

/// Durable key/row storage for entries and turns.
///
/// Implementations must be `Send + Sync`; the memory store is shared by
/// every router instance.
pub trait MemoryBackend: Send + Sync {
    /// Insert or replace an entry.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn put_entry(&self, entry: &MemoryEntry) -> Result<()>;

    /// Fetch an entry by ID.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn get_entry(&self, id: MemoryId) -> Result<Option<MemoryEntry>>;

    /// Return every stored entry.
    ///
    /// # Errors
    /// Only failures of the scan itself; per-row failures are reported
    /// inside each [`ScannedEntry`].
    fn scan_entries(&self) -> Result<Vec<ScannedEntry>>;

    /// Delete an entry. Returns `true` if a row was removed.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn delete_entry(&self, id: MemoryId) -> Result<bool>;

    /// Delete a row by its raw storage key.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn delete_key(&self, key: &str) -> Result<bool>;

    /// Number of stored entries.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn entry_count(&self) -> Result<usize>;

    /// Insert or replace a conversation turn.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn put_turn(&self, turn: &ConversationTurn) -> Result<()>;

    /// Fetch a turn by ID.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn get_turn(&self, id: TurnId) -> Result<Option<ConversationTurn>>;

    /// All turns of a session, in no particular order.
    ///
    /// # Errors
    /// Storage or decoding failures.
    fn session_turns(&self, session: SessionId) -> Result<Vec<ConversationTurn>>;

    /// Delete a turn. Returns `true` if a row was removed.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn delete_turn(&self, id: TurnId) -> Result<bool>;

    /// Delete every turn recorded before `cutoff`. Returns how many were
    /// removed.
    ///
    /// # Errors
    /// Backend-specific storage failures.
    fn delete_turns_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Open the backend selected by `config.backend`.
///
/// # Errors
/// Returns `RecallError::Config` for unknown backend names and propagates
/// failures to open the database.
pub fn open_backend(config: &PersistenceConfig) -> Result<Arc<dyn MemoryBackend>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryBackend::new())),
        "sqlite" => Ok(Arc::new(SqliteBackend::open(&config.path, config)?)),
        other => Err(RecallError::Config(format!(
            "unknown persistence backend '{other}' (expected \"memory\" or \"sqlite\")"
        ))),
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Volatile backend backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<MemoryId, MemoryEntry>>,
    turns: RwLock<HashMap<TurnId, ConversationTurn>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryBackend for InMemoryBackend {
    fn put_entry(&self, entry: &MemoryEntry) -> Result<()> {
        self.entries.write().insert(entry.id, entry.clone());
        Ok(())
    }

    fn get_entry(&self, id: MemoryId) -> Result<Option<MemoryEntry>> {
        Ok(self.entries.read().get(&id).cloned())
    }

    fn scan_entries(&self) -> Result<Vec<ScannedEntry>> {
        Ok(self
            .entries
            .read()
            .values()
            .map(|e| ScannedEntry {
                key: e.id.to_string(),
                entry: Ok(e.clone()),
            })
            .collect())
    }

    fn delete_entry(&self, id: MemoryId) -> Result<bool> {
        Ok(self.entries.write().remove(&id).is_some())
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        match uuid::Uuid::parse_str(key) {
            Ok(uuid) => self.delete_entry(MemoryId(uuid)),
            Err(_) => Ok(false),
        }
    }

    fn entry_count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn put_turn(&self, turn: &ConversationTurn) -> Result<()> {
        self.turns.write().insert(turn.id, turn.clone());
        Ok(())
    }

    fn get_turn(&self, id: TurnId) -> Result<Option<ConversationTurn>> {
        Ok(self.turns.read().get(&id).cloned())
    }

    fn session_turns(&self, session: SessionId) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .turns
            .read()
            .values()
            .filter(|t| t.session_id == session)
            .cloned()
            .collect())
    }

    fn delete_turn(&self, id: TurnId) -> Result<bool> {
        Ok(self.turns.write().remove(&id).is_some())
    }

    fn delete_turns_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut turns = self.turns.write();
        let before = turns.len();
        turns.retain(|_, t| t.timestamp >= cutoff);
        Ok(before - turns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseSource;

    fn entry() -> MemoryEntry {
        MemoryEntry::new("q", "a", "a", "alpha", 0.8, Utc::now())
    }

    #[test]
    fn in_memory_crud() {
        let backend = InMemoryBackend::new();
        let e = entry();
        backend.put_entry(&e).expect("put");
        assert_eq!(backend.entry_count().expect("count"), 1);
        assert_eq!(backend.get_entry(e.id).expect("get"), Some(e.clone()));
        assert_eq!(backend.scan_entries().expect("scan").len(), 1);
        assert!(backend.delete_entry(e.id).expect("delete"));
        assert!(!backend.delete_entry(e.id).expect("delete again"));
    }

    #[test]
    fn delete_by_raw_key() {
        let backend = InMemoryBackend::new();
        let e = entry();
        backend.put_entry(&e).expect("put");
        assert!(!backend.delete_key("not-a-uuid").expect("bad key"));
        assert!(backend.delete_key(&e.id.to_string()).expect("key"));
        assert_eq!(backend.entry_count().expect("count"), 0);
    }

    #[test]
    fn turns_filtered_by_session() {
        let backend = InMemoryBackend::new();
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        for s in [s1, s1, s2] {
            let t = ConversationTurn::new(s, "q", "a", "a", ResponseSource::Fallback, 0.2);
            backend.put_turn(&t).expect("put");
        }
        assert_eq!(backend.session_turns(s1).expect("s1").len(), 2);
        assert_eq!(backend.session_turns(s2).expect("s2").len(), 1);
    }

    #[test]
    fn open_backend_rejects_unknown() {
        let config = PersistenceConfig {
            backend: "postgres".into(),
            ..PersistenceConfig::default()
        };
        assert!(matches!(open_backend(&config), Err(RecallError::Config(_))));
    }
}

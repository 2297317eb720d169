//! The memory store: persisted question/answer pairs with similarity lookup.
//!
//! Lookups scan every row through the [`MemoryBackend`], rank candidates with
//! [`MatchRank`] and apply three hard gates:
//!
//! ```text
//! eligible = similarity >= min_similarity
//!          ∧ age <= max_memory_age_days
//!          ∧ effectiveness >= min_effectiveness
//! ```
//!
//! Rows that cannot be decoded or fail [`MemoryEntry::validate`] are logged
//! and skipped; they never fail a lookup.

pub mod entry;

pub use entry::MemoryEntry;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::{RecallError, Result};
use crate::persistence::{InMemoryBackend, MemoryBackend};
use crate::similarity::{MatchRank, jaccard};
use crate::text;
use crate::types::MemoryId;

/// A successful similarity lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMatch {
    /// The matched entry, as stored.
    pub entry: MemoryEntry,
    /// Jaccard similarity between the query and the entry's query.
    pub similarity: f32,
    /// Confidence to report: `entry.confidence * similarity`.
    pub confidence: f32,
}

/// Outcome of an age-based cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Rows looked at.
    pub examined: usize,
    /// Entries deleted for being too old.
    pub removed: usize,
    /// Rows skipped because they could not be used.
    pub malformed: usize,
    /// Conversation turns deleted for being too old.
    pub turns_removed: usize,
}

/// Similarity-searchable store of past answers.
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    config: MemoryConfig,
    /// Serialises read-modify-write updates of single entries.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a store over an existing backend.
    #[must_use]
    pub fn new(backend: Arc<dyn MemoryBackend>, config: MemoryConfig) -> Self {
        Self {
            backend,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// A store over a fresh [`InMemoryBackend`].
    #[must_use]
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), config)
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The backend this store reads and writes.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    /// Find the best reusable entry for `query`.
    ///
    /// # Errors
    /// Only failures of the backend scan itself; bad rows are skipped.
    pub fn find_similar(&self, query: &str, min_similarity: f32) -> Result<Option<MemoryMatch>> {
        self.find_similar_at(query, min_similarity, Utc::now())
    }

    /// [`find_similar`](Self::find_similar) evaluated at an explicit time.
    ///
    /// # Errors
    /// Only failures of the backend scan itself.
    pub fn find_similar_at(
        &self,
        query: &str,
        min_similarity: f32,
        now: DateTime<Utc>,
    ) -> Result<Option<MemoryMatch>> {
        let query_keywords = text::keywords(query);
        if query_keywords.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(MatchRank, MemoryEntry, f32)> = None;
        for entry in self.usable_entries()? {
            let similarity = jaccard(&query_keywords, &entry.keywords);
            if similarity < min_similarity
                || !entry.is_fresh(now, self.config.max_memory_age_days)
                || entry.effectiveness < self.config.min_effectiveness
            {
                continue;
            }
            let rank = MatchRank::new(similarity, entry.confidence, entry.created_at);
            if best.as_ref().is_none_or(|(r, _, _)| rank > *r) {
                best = Some((rank, entry, similarity));
            }
        }

        Ok(best.map(|(_, entry, similarity)| {
            debug!(entry = %entry.id, similarity, "Memory match");
            let confidence = entry.reuse_confidence(similarity);
            MemoryMatch {
                entry,
                similarity,
                confidence,
            }
        }))
    }

    /// Persist an entry.
    ///
    /// # Errors
    /// Backend write failures.
    pub fn store(&self, entry: &MemoryEntry) -> Result<MemoryId> {
        self.backend.put_entry(entry)?;
        debug!(entry = %entry.id, provider = %entry.provider, "Stored memory entry");
        Ok(entry.id)
    }

    /// Build an entry with the configured initial effectiveness and store it.
    ///
    /// # Errors
    /// Backend write failures.
    pub fn remember(
        &self,
        query: &str,
        answer: &str,
        rewritten_answer: &str,
        provider: &str,
        confidence: f32,
    ) -> Result<MemoryId> {
        let entry = MemoryEntry::new(query, answer, rewritten_answer, provider, confidence, Utc::now())
            .with_effectiveness(self.config.initial_effectiveness);
        self.store(&entry)
    }

    /// Fetch an entry by ID.
    ///
    /// # Errors
    /// Backend failures.
    pub fn get(&self, id: MemoryId) -> Result<Option<MemoryEntry>> {
        self.backend.get_entry(id)
    }

    /// Count one reuse of an entry.
    ///
    /// # Errors
    /// [`RecallError::EntryNotFound`] for unknown IDs, or backend failures.
    pub fn record_usage(&self, id: MemoryId) -> Result<u32> {
        self.record_usage_at(id, Utc::now())
    }

    /// [`record_usage`](Self::record_usage) with an explicit time.
    ///
    /// # Errors
    /// [`RecallError::EntryNotFound`] for unknown IDs, or backend failures.
    pub fn record_usage_at(&self, id: MemoryId, now: DateTime<Utc>) -> Result<u32> {
        let _guard = self.write_lock.lock();
        let mut entry = self.backend.get_entry(id)?.ok_or(RecallError::EntryNotFound(id))?;
        entry.record_use(now);
        self.backend.put_entry(&entry)?;
        Ok(entry.usage_count)
    }

    /// Apply feedback to an entry, returning its new effectiveness.
    ///
    /// # Errors
    /// [`RecallError::EntryNotFound`] for unknown IDs, or backend failures.
    pub fn decay_or_boost(&self, id: MemoryId, positive: bool) -> Result<f32> {
        let _guard = self.write_lock.lock();
        let mut entry = self.backend.get_entry(id)?.ok_or(RecallError::EntryNotFound(id))?;
        let before = entry.effectiveness;
        entry.apply_feedback(positive, self.config.learning_rate);
        self.backend.put_entry(&entry)?;
        debug!(entry = %id, positive, before, after = entry.effectiveness, "Feedback applied");
        Ok(entry.effectiveness)
    }

    /// Delete entries and conversation turns older than `older_than_days`.
    ///
    /// # Errors
    /// Backend failures.
    pub fn cleanup(&self, older_than_days: u32) -> Result<CleanupReport> {
        self.cleanup_at(older_than_days, Utc::now())
    }

    /// [`cleanup`](Self::cleanup) evaluated at an explicit time.
    ///
    /// # Errors
    /// Backend failures.
    pub fn cleanup_at(&self, older_than_days: u32, now: DateTime<Utc>) -> Result<CleanupReport> {
        let max_age = Duration::days(i64::from(older_than_days));
        let mut report = CleanupReport::default();

        let _guard = self.write_lock.lock();
        for row in self.backend.scan_entries()? {
            report.examined += 1;
            match row.entry {
                Ok(entry) if entry.age(now) > max_age => {
                    if self.backend.delete_entry(entry.id)? {
                        report.removed += 1;
                    }
                }
                Ok(_) => {}
                Err(_) => report.malformed += 1,
            }
        }

        report.turns_removed = self.backend.delete_turns_before(now - max_age)?;

        if report.removed > 0 || report.turns_removed > 0 {
            info!(
                removed = report.removed,
                turns_removed = report.turns_removed,
                examined = report.examined,
                older_than_days,
                "Memory cleanup"
            );
        }
        Ok(report)
    }

    /// Shrink the store to at most `max_entries`, dropping the least
    /// effective entries first and the oldest among equals. Returns how many
    /// were removed.
    ///
    /// # Errors
    /// Backend failures.
    pub fn trim_to(&self, max_entries: usize) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut entries = self.usable_entries()?;
        if entries.len() <= max_entries {
            return Ok(0);
        }

        entries.sort_by(|a, b| {
            a.effectiveness
                .total_cmp(&b.effectiveness)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let excess = entries.len() - max_entries;
        let mut removed = 0;
        for entry in entries.iter().take(excess) {
            if self.backend.delete_entry(entry.id)? {
                removed += 1;
            }
        }
        info!(removed, max_entries, "Memory store trimmed");
        Ok(removed)
    }

    /// Number of stored rows.
    ///
    /// # Errors
    /// Backend failures.
    pub fn len(&self) -> Result<usize> {
        self.backend.entry_count()
    }

    /// Whether the store holds no rows.
    ///
    /// # Errors
    /// Backend failures.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn usable_entries(&self) -> Result<Vec<MemoryEntry>> {
        let rows = self.backend.scan_entries()?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match row.entry {
                Ok(entry) => match entry.validate() {
                    Ok(()) => entries.push(entry),
                    Err(reason) => warn!(key = %row.key, %reason, "Skipping invalid memory entry"),
                },
                Err(e) => warn!(key = %row.key, error = %e, "Skipping undecodable memory entry"),
            }
        }
        Ok(entries)
    }
}

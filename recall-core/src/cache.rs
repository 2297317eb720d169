//! Fallback cache and local answer generation.
//!
//! The cache is the last stop of the resolution pipeline. It keeps recent
//! provider answers keyed by query fingerprint and, when nothing is cached,
//! produces a canned or templated local answer.
//!
//! Eviction removes the entry with the lowest `(usage_count, last_used)`
//! pair once the cache grows past capacity. Entries older than the TTL are
//! misses and are purged on lookup.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CacheConfig;
use crate::text::{self, Fingerprint};

/// Confidence of an answer served from the cache.
pub const CACHE_HIT_CONFIDENCE: f32 = 0.5;
/// Confidence of a canned answer from the category table.
pub const CANNED_CONFIDENCE: f32 = 0.4;
/// Confidence of the generic template answer.
pub const GENERIC_CONFIDENCE: f32 = 0.2;

/// A cached answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Fingerprint of the normalized query.
    pub fingerprint: Fingerprint,
    /// Answer text.
    pub answer: String,
    /// When the answer was (last) inserted.
    pub inserted_at: DateTime<Utc>,
    /// Lookups served by this entry.
    pub usage_count: u32,
    /// Last lookup, or the insertion time if never read.
    pub last_used: DateTime<Utc>,
}

impl CachedResponse {
    fn eviction_key(&self) -> (u32, DateTime<Utc>, &str) {
        (self.usage_count, self.last_used, self.fingerprint.as_str())
    }
}

/// A locally generated answer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAnswer {
    /// Answer text, never empty.
    pub text: String,
    /// Name of the matched category, `None` for the generic template.
    pub category: Option<&'static str>,
    /// Confidence to report for this answer.
    pub confidence: f32,
}

struct Category {
    name: &'static str,
    triggers: &'static [&'static str],
    response: &'static str,
}

/// Checked in declaration order; the first category with a matching token wins.
const CATEGORIES: &[Category] = &[
    Category {
        name: "greeting",
        triggers: &["hello", "hi", "hey", "greetings", "howdy", "morning", "evening"],
        response: "Hello! I'm running on local knowledge right now, but I'm glad to help where I can.",
    },
    Category {
        name: "farewell",
        triggers: &["bye", "goodbye", "farewell", "later", "goodnight"],
        response: "Goodbye! Come back any time.",
    },
    Category {
        name: "thanks",
        triggers: &["thanks", "thank", "thx", "appreciate", "cheers"],
        response: "You're welcome. Happy to help.",
    },
    Category {
        name: "help",
        triggers: &["help", "assist", "assistance", "support", "stuck", "how"],
        response: "I can answer from what I've learned so far. Try asking about one specific topic.",
    },
    Category {
        name: "weather",
        triggers: &["weather", "rain", "sunny", "forecast", "temperature", "snow"],
        response: "I can't check live conditions at the moment. A local forecast service will have current details.",
    },
    Category {
        name: "time",
        triggers: &["time", "date", "today", "clock", "day"],
        response: "I can't read a live clock right now. Your device's clock is the most reliable source.",
    },
    Category {
        name: "metaverse",
        triggers: &["metaverse", "virtual", "avatar", "vr", "world"],
        response: "The metaverse is a network of shared virtual spaces where people meet and interact through avatars.",
    },
    Category {
        name: "technology",
        triggers: &["computer", "software", "code", "programming", "rust", "internet"],
        response: "That's a technology question. I'll have a fuller answer once my upstream sources are reachable again.",
    },
];

/// Bounded cache of recent answers plus the local generator.
#[derive(Debug)]
pub struct FallbackCache {
    entries: Mutex<HashMap<Fingerprint, CachedResponse>>,
    capacity: usize,
    ttl: Duration,
}

impl FallbackCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.capacity, config.ttl())
    }

    /// Create a cache with explicit capacity and TTL.
    #[must_use]
    pub fn with_capacity(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity.min(1024))),
            capacity,
            ttl,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A zero-capacity cache stores nothing.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.capacity > 0
    }

    /// Current number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Look up a fingerprint.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        self.get_at(fingerprint, Utc::now())
    }

    /// [`get`](Self::get) evaluated at an explicit time.
    #[must_use]
    pub fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = entries
            .get(fingerprint)
            .is_some_and(|e| now - e.inserted_at > self.ttl);
        if expired {
            entries.remove(fingerprint);
            debug!(fingerprint, "Cache entry expired");
            return None;
        }

        let entry = entries.get_mut(fingerprint)?;
        entry.usage_count = entry.usage_count.saturating_add(1);
        entry.last_used = now;
        Some(entry.answer.clone())
    }

    /// Insert or refresh an answer.
    pub fn put(&self, fingerprint: &str, text: &str) {
        self.put_at(fingerprint, text, Utc::now());
    }

    /// [`put`](Self::put) at an explicit time. Expired entries are dropped
    /// first; if the cache is still over capacity the least used entry other
    /// than the one just written is evicted.
    pub fn put_at(&self, fingerprint: &str, text: &str, now: DateTime<Utc>) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        entries.retain(|_, e| now - e.inserted_at <= self.ttl);

        entries
            .entry(fingerprint.to_string())
            .and_modify(|e| {
                e.answer = text.to_string();
                e.inserted_at = now;
            })
            .or_insert_with(|| CachedResponse {
                fingerprint: fingerprint.to_string(),
                answer: text.to_string(),
                inserted_at: now,
                usage_count: 0,
                last_used: now,
            });

        while entries.len() > self.capacity {
            let victim = entries
                .values()
                .filter(|e| e.fingerprint != fingerprint)
                .min_by(|a, b| a.eviction_key().cmp(&b.eviction_key()))
                .map(|e| e.fingerprint.clone());
            let Some(victim) = victim else { break };
            entries.remove(&victim);
            debug!(fingerprint = %victim, "Cache entry evicted");
        }
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now - e.inserted_at <= self.ttl);
        before - entries.len()
    }

    /// Produce a local answer for `query` without any external help.
    #[must_use]
    pub fn generate_local(&self, query: &str) -> LocalAnswer {
        let normalized = text::normalize(query);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

        if let Some(category) = CATEGORIES
            .iter()
            .find(|c| c.triggers.iter().any(|t| tokens.contains(t)))
        {
            return LocalAnswer {
                text: category.response.to_string(),
                category: Some(category.name),
                confidence: CANNED_CONFIDENCE,
            };
        }

        let keywords = text::keywords(query);
        let topic = if keywords.is_empty() {
            "that".to_string()
        } else {
            keywords.iter().take(3).cloned().collect::<Vec<_>>().join(" ")
        };
        LocalAnswer {
            text: format!(
                "I don't have a confident answer about {topic} right now. Please try again in a little while."
            ),
            category: None,
            confidence: GENERIC_CONFIDENCE,
        }
    }
}

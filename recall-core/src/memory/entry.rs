//! A stored question/answer pair with usage and feedback tracking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::text;
use crate::types::{Keywords, MemoryId, clamp_unit};

/// Effectiveness assigned when no configuration is at hand.
pub const DEFAULT_EFFECTIVENESS: f32 = 0.5;

/// A remembered interaction that can be reused for similar queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier for this entry.
    pub id: MemoryId,
    /// The original query text.
    pub query: String,
    /// Canonical answer text. Rewriting always starts from here.
    pub answer: String,
    /// The answer as first delivered. Reuse rewrites from `answer` and
    /// leaves this untouched.
    pub rewritten_answer: String,
    /// Label of the source that produced the answer.
    pub provider: String,
    /// When the entry was first stored.
    pub created_at: DateTime<Utc>,
    /// Reliability estimate of the answer (0.0 to 1.0).
    pub confidence: f32,
    /// Keywords extracted from `query`.
    pub keywords: Keywords,
    /// Fingerprint of the normalized query.
    pub fingerprint: String,
    /// How many times this entry has been reused.
    pub usage_count: u32,
    /// Last reuse, if any.
    pub last_used: Option<DateTime<Utc>>,
    /// Feedback-adjusted quality estimate (0.0 to 1.0).
    pub effectiveness: f32,
}

impl MemoryEntry {
    /// Create a new entry, deriving keywords and fingerprint from `query`.
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        answer: impl Into<String>,
        rewritten_answer: impl Into<String>,
        provider: impl Into<String>,
        confidence: f32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let query = query.into();
        let keywords = text::keywords(&query);
        let fingerprint = text::fingerprint(&query);
        Self {
            id: MemoryId::new(),
            query,
            answer: answer.into(),
            rewritten_answer: rewritten_answer.into(),
            provider: provider.into(),
            created_at,
            confidence: clamp_unit(confidence),
            keywords,
            fingerprint,
            usage_count: 0,
            last_used: None,
            effectiveness: DEFAULT_EFFECTIVENESS,
        }
    }

    /// Override the starting effectiveness.
    #[must_use]
    pub fn with_effectiveness(mut self, effectiveness: f32) -> Self {
        self.effectiveness = clamp_unit(effectiveness);
        self
    }

    /// Age of the entry at `now`. Negative ages (clock skew) count as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    /// Whether the entry is at most `max_age_days` old at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_days: u32) -> bool {
        self.age(now) <= Duration::days(i64::from(max_age_days))
    }

    /// Confidence handed to callers when this entry answers a query with
    /// the given similarity.
    #[must_use]
    pub fn reuse_confidence(&self, similarity: f32) -> f32 {
        clamp_unit(self.confidence * clamp_unit(similarity))
    }

    /// Record a reuse.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used = Some(now);
    }

    /// Move effectiveness toward 1 on positive feedback, toward 0 on
    /// negative feedback.
    pub fn apply_feedback(&mut self, positive: bool, learning_rate: f32) {
        let rate = clamp_unit(learning_rate);
        let score = self.effectiveness;
        self.effectiveness = if positive {
            score + (1.0 - score) * rate
        } else {
            score * (1.0 - rate)
        };
        self.effectiveness = clamp_unit(self.effectiveness);
    }

    /// Check the invariants a stored entry must satisfy to be reused.
    ///
    /// # Errors
    /// Returns a human-readable reason when the entry is unusable.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if !(0.0..=1.0).contains(&self.effectiveness) {
            return Err(format!("effectiveness {} outside [0, 1]", self.effectiveness));
        }
        if self.answer.trim().is_empty() {
            return Err("empty answer".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(confidence: f32) -> MemoryEntry {
        MemoryEntry::new(
            "What is the metaverse?",
            "A shared virtual space.",
            "A shared virtual space.",
            "alpha",
            confidence,
            Utc::now(),
        )
    }

    #[test]
    fn new_derives_keywords_and_clamps() {
        let e = entry(1.4);
        assert!((e.confidence - 1.0).abs() < f32::EPSILON);
        assert!(e.keywords.contains("metaverse"));
        assert_eq!(e.fingerprint, text::fingerprint("what is the metaverse"));
        assert_eq!(e.usage_count, 0);
    }

    #[test]
    fn reuse_keeps_first_delivery() {
        let mut e = entry(0.8);
        e.rewritten_answer = "A shared virtual space! 🎉".into();
        let later = e.created_at + Duration::hours(1);
        e.record_use(later);
        assert_eq!(e.usage_count, 1);
        assert_eq!(e.last_used, Some(later));
        assert_eq!(e.rewritten_answer, "A shared virtual space! 🎉");
    }

    #[test]
    fn positive_feedback_moves_toward_one() {
        let mut e = entry(0.9);
        e.apply_feedback(true, 0.1);
        assert!((e.effectiveness - 0.55).abs() < 1e-6);
        for _ in 0..200 {
            e.apply_feedback(true, 0.1);
        }
        assert!(e.effectiveness <= 1.0);
        assert!(e.effectiveness > 0.99);
    }

    #[test]
    fn negative_feedback_moves_toward_zero() {
        let mut e = entry(0.9);
        e.apply_feedback(false, 0.1);
        assert!((e.effectiveness - 0.45).abs() < 1e-6);
    }

    #[test]
    fn reuse_confidence_is_discounted_by_similarity() {
        let e = entry(0.9);
        assert!((e.reuse_confidence(1.0) - 0.9).abs() < 1e-6);
        assert!((e.reuse_confidence(0.5) - 0.45).abs() < 1e-6);
        assert!(e.reuse_confidence(0.7) < e.reuse_confidence(0.8));
    }

    #[test]
    fn freshness_gate() {
        let mut e = entry(0.9);
        let now = Utc::now();
        e.created_at = now - Duration::days(31);
        assert!(!e.is_fresh(now, 30));
        e.created_at = now - Duration::days(29);
        assert!(e.is_fresh(now, 30));
        e.created_at = now + Duration::hours(1);
        assert!(e.is_fresh(now, 30), "future timestamps are treated as new");
    }

    #[test]
    fn validate_rejects_broken_entries() {
        let mut e = entry(0.5);
        assert!(e.validate().is_ok());
        e.confidence = f32::NAN;
        assert!(e.validate().is_err());
        let mut e = entry(0.5);
        e.answer = "   ".into();
        assert!(e.validate().is_err());
    }
}

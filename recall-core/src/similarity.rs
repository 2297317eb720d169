//! Keyword-overlap similarity and match ranking.
//!
//! ```text
//! similarity(a, b) = |kw(a) ∩ kw(b)| / |kw(a) ∪ kw(b)|
//! ```
//!
//! Candidates are ranked by similarity, then stored confidence, then
//! recency. Two empty keyword sets have similarity 0: a query made only of
//! stop-words never matches anything.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;

use crate::types::Keywords;

/// Token-set Jaccard similarity in `[0, 1]`.
#[must_use]
pub fn jaccard(a: &Keywords, b: &Keywords) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Ordering key for a similarity candidate. Greater is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRank {
    /// Jaccard similarity to the query.
    pub similarity: OrderedFloat<f32>,
    /// Stored confidence of the candidate.
    pub confidence: OrderedFloat<f32>,
    /// Creation time of the candidate.
    pub created_at: DateTime<Utc>,
}

impl MatchRank {
    /// Build a rank from raw values.
    #[must_use]
    pub fn new(similarity: f32, confidence: f32, created_at: DateTime<Utc>) -> Self {
        Self {
            similarity: OrderedFloat(similarity),
            confidence: OrderedFloat(confidence),
            created_at,
        }
    }
}

impl PartialOrd for MatchRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .cmp(&other.similarity)
            .then_with(|| self.confidence.cmp(&other.confidence))
            .then_with(|| self.created_at.cmp(&other.created_at))
    }
}

//! Text normalization, keyword extraction and query fingerprints.
//!
//! All similarity and caching decisions operate on the normalized form:
//! lowercase, punctuation stripped, whitespace collapsed. Apostrophes are
//! dropped rather than split on, so "what's" normalizes to "whats".

use sha2::{Digest, Sha256};

use crate::types::Keywords;

/// English stop-words ignored by keyword extraction.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be", "been",
    "being", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "he", "her", "here", "him", "his", "how", "i", "if", "im", "in", "into", "is", "it",
    "its", "just", "me", "my", "of", "on", "or", "our", "please", "she", "should", "so", "some",
    "tell", "than", "that", "thats", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "to", "too", "us", "very", "was", "we", "were", "what", "whats", "when",
    "where", "which", "who", "whom", "whose", "why", "will", "with", "would", "you", "your",
];

/// A hex-encoded SHA-256 of a normalized query.
pub type Fingerprint = String;

/// Lowercase, drop apostrophes, turn other punctuation into spaces and
/// collapse runs of whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Whether a normalized token is a stop-word.
#[must_use]
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Extract the keyword set of `text`: normalized tokens minus stop-words.
#[must_use]
pub fn keywords(text: &str) -> Keywords {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty() && !is_stop_word(t))
        .map(str::to_string)
        .collect()
}

/// Stable fingerprint of a query, used as the fallback cache key.
///
/// Queries that differ only in case, punctuation or spacing share a
/// fingerprint.
#[must_use]
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_words_are_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  What's   the METAVERSE?! "), "whats the metaverse");
        assert_eq!(normalize("rust,tokio;serde"), "rust tokio serde");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn keywords_drop_stop_words() {
        let kw = keywords("What is the metaverse?");
        assert_eq!(kw.len(), 1);
        assert!(kw.contains("metaverse"));
    }

    #[test]
    fn keywords_of_only_stop_words_is_empty() {
        assert!(keywords("what is it").is_empty());
    }

    #[test]
    fn fingerprint_ignores_surface_differences() {
        assert_eq!(fingerprint("Hello, World!"), fingerprint("hello world"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello there"));
        assert_eq!(fingerprint("x").len(), 64);
    }
}

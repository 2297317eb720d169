//! Error types for the recall core library.

use thiserror::Error;

use crate::types::{MemoryId, TurnId};

/// Top-level error type for all recall-core operations.
#[derive(Error, Debug)]
pub enum RecallError {
    /// Configuration is missing, inconsistent or out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A memory entry with the given ID was not found.
    #[error("Memory entry not found: {0}")]
    EntryNotFound(MemoryId),

    /// A conversation turn with the given ID was not found.
    #[error("Conversation turn not found: {0}")]
    TurnNotFound(TurnId),

    /// A stored entry could not be used (bad encoding or invariant violation).
    #[error("Malformed stored entry {key}: {reason}")]
    MalformedEntry {
        /// Storage key of the offending row.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, RecallError>;

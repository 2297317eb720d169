//! # Recall Core Library
//!
//! Local state of the recall answer pipeline:
//!
//! - **Memory store**: past answers with keyword-overlap similarity lookup,
//!   usage counts and feedback-driven effectiveness
//! - **Fallback cache**: recent answers keyed by query fingerprint, plus
//!   canned local answers when nothing else is available
//! - **Response rewriter**: persona-driven lexical rewriting so reused
//!   answers are not repeated verbatim
//! - **Conversation log**: per-session turns and rolling context windows
//! - **Persistence**: in-memory and `SQLite` backends
//!
//! Provider handling lives in `recall-llm`; the state machine that ties
//! everything together lives in `recall-router`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod persistence;
pub mod rewrite;
pub mod similarity;
pub mod text;
pub mod types;

pub use cache::{CachedResponse, FallbackCache, LocalAnswer};
pub use config::RecallConfig;
pub use conversation::{ContextTurn, ConversationLog, ConversationTurn};
pub use error::{RecallError, Result};
pub use memory::{CleanupReport, MemoryEntry, MemoryMatch, MemoryStore};
pub use persistence::{InMemoryBackend, MemoryBackend, SqliteBackend};
pub use rewrite::{Persona, ResponseRewriter};
pub use types::*;

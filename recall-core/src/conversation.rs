//! Conversation turns and the per-session append-only log.
//!
//! The log keeps turns in arrival order and serves short rolling context
//! windows to providers. Every appended turn is also written through to the
//! persistence backend so feedback can find it later by ID.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::persistence::MemoryBackend;
use crate::text;
use crate::types::{Keywords, MemoryId, ResponseSource, SessionId, TurnId};

/// One resolved query within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique identifier for this turn.
    pub id: TurnId,
    /// Session the turn belongs to.
    pub session_id: SessionId,
    /// What the user asked.
    pub user_input: String,
    /// The raw answer chosen by the router.
    pub answer: String,
    /// The answer as delivered after rewriting.
    pub rewritten_answer: String,
    /// When the turn was resolved.
    pub timestamp: DateTime<Utc>,
    /// Where the answer came from.
    pub source: ResponseSource,
    /// Confidence reported to the caller.
    pub confidence: f32,
    /// Wall-clock time spent resolving, in milliseconds.
    pub processing_ms: u64,
    /// Keywords of `user_input`.
    pub keywords: Keywords,
    /// Memory entry written or reused by this turn.
    pub memory_id: Option<MemoryId>,
}

impl ConversationTurn {
    /// Build a turn, deriving keywords from the user input.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        user_input: impl Into<String>,
        answer: impl Into<String>,
        rewritten_answer: impl Into<String>,
        source: ResponseSource,
        confidence: f32,
    ) -> Self {
        let user_input = user_input.into();
        let keywords = text::keywords(&user_input);
        Self {
            id: TurnId::new(),
            session_id,
            user_input,
            answer: answer.into(),
            rewritten_answer: rewritten_answer.into(),
            timestamp: Utc::now(),
            source,
            confidence,
            processing_ms: 0,
            keywords,
            memory_id: None,
        }
    }
}

/// A user/assistant exchange handed to providers as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    /// What the user said.
    pub user: String,
    /// What was answered.
    pub assistant: String,
}

impl From<&ConversationTurn> for ContextTurn {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            user: turn.user_input.clone(),
            assistant: turn.rewritten_answer.clone(),
        }
    }
}

/// Append-only turn list for one session.
pub struct ConversationLog {
    session_id: SessionId,
    turns: Vec<ConversationTurn>,
    backend: Option<Arc<dyn MemoryBackend>>,
}

impl std::fmt::Debug for ConversationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLog")
            .field("session_id", &self.session_id)
            .field("turns", &self.turns.len())
            .finish_non_exhaustive()
    }
}

impl ConversationLog {
    /// An in-memory log that is not persisted.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            turns: Vec::new(),
            backend: None,
        }
    }

    /// A log that writes every turn through to `backend`.
    #[must_use]
    pub fn persistent(session_id: SessionId, backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            session_id,
            turns: Vec::new(),
            backend: Some(backend),
        }
    }

    /// Reload a persisted session in timestamp order.
    ///
    /// # Errors
    /// Propagates backend failures.
    pub fn restore(session_id: SessionId, backend: Arc<dyn MemoryBackend>) -> Result<Self> {
        let mut turns = backend.session_turns(session_id)?;
        turns.sort_by_key(|t| t.timestamp);
        Ok(Self {
            session_id,
            turns,
            backend: Some(backend),
        })
    }

    /// The session this log belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Append a turn. A persistence failure is logged; the in-memory log is
    /// still updated.
    pub fn append(&mut self, turn: ConversationTurn) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.put_turn(&turn) {
                warn!(turn = %turn.id, error = %e, "Failed to persist conversation turn");
            }
        }
        self.turns.push(turn);
    }

    /// Append a turn the caller has already written to the backend.
    pub fn append_persisted(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// The backend turns are written through to, if any.
    #[must_use]
    pub fn backend(&self) -> Option<&Arc<dyn MemoryBackend>> {
        self.backend.as_ref()
    }

    /// The last `k` turns, oldest first.
    #[must_use]
    pub fn recent(&self, k: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    /// The last `k` turns as provider context, oldest first.
    #[must_use]
    pub fn context_window(&self, k: usize) -> Vec<ContextTurn> {
        self.recent(k).iter().map(ContextTurn::from).collect()
    }

    /// Find a turn of this session by ID.
    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.id == id)
    }

    /// Number of turns so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

//! The per-session query router.
//!
//! ```text
//! Start ──gate──▶ TryMemory ──miss──▶ TryProvider ──exhausted──▶ TryFallback
//!   │                │                    │                          │
//!   └──no gate───────┼──────────▶ TryProvider                        │
//!                    └──hit──▶ Done ◀──answer──┘◀────────────────────┘
//! ```
//!
//! Every path ends in `Done`. Provider failures, store errors and malformed
//! rows are absorbed into transitions; the caller always gets an answer.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use recall_core::cache::CACHE_HIT_CONFIDENCE;
use recall_core::conversation::{ConversationLog, ConversationTurn};
use recall_core::error::Result;
use recall_core::memory::MemoryMatch;
use recall_core::text;
use recall_core::types::{MemoryId, ResponseSource, SessionId, TurnId, clamp_unit};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{self, ProviderAnswer};
use crate::services::RouterServices;

/// Stored-entry provider label for fallback answers.
const FALLBACK_LABEL: &str = "fallback";

/// What the caller gets back for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Delivered (rewritten) answer text.
    pub text: String,
    /// Where the answer came from.
    pub source: ResponseSource,
    /// Confidence in `[0, 1]`; below 0.6 signals fallback quality.
    pub confidence: f32,
    /// Time spent resolving.
    pub latency: Duration,
    /// Whether the answer was reused from memory.
    pub used_memory: bool,
    /// Turn recorded for this query; pass to feedback.
    pub turn_id: TurnId,
    /// 1-based interaction number within this router.
    pub interaction: u64,
    /// Whether the memory gate fired on this interaction.
    pub memory_attempted: bool,
}

/// The answer chosen before rewriting.
#[derive(Debug)]
struct Candidate {
    raw: String,
    source: ResponseSource,
    confidence: f32,
    /// Entry reused from memory, if any.
    reused: Option<MemoryId>,
}

#[derive(Debug)]
enum RouterState {
    Start,
    TryMemory,
    TryProvider,
    TryFallback,
    Done(Candidate),
}

/// Resolves queries for one session over shared [`RouterServices`].
#[derive(Debug)]
pub struct QueryRouter {
    services: Arc<RouterServices>,
    log: ConversationLog,
    interaction: u64,
}

impl QueryRouter {
    /// Start a new session.
    #[must_use]
    pub fn new(services: Arc<RouterServices>) -> Self {
        let log = ConversationLog::persistent(SessionId::new(), Arc::clone(services.backend()));
        Self {
            services,
            log,
            interaction: 0,
        }
    }

    /// Continue a persisted session. The interaction counter resumes from
    /// the number of turns already recorded.
    ///
    /// # Errors
    /// Backend failures while loading the session.
    pub fn resume(services: Arc<RouterServices>, session: SessionId) -> Result<Self> {
        let log = ConversationLog::restore(session, Arc::clone(services.backend()))?;
        let interaction = log.len() as u64;
        info!(session = %session, turns = interaction, "Session resumed");
        Ok(Self {
            services,
            log,
            interaction,
        })
    }

    /// This router's session.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.log.session_id()
    }

    /// Interactions resolved so far.
    #[must_use]
    pub fn interaction_count(&self) -> u64 {
        self.interaction
    }

    /// The session's conversation log.
    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// The shared services.
    #[must_use]
    pub fn services(&self) -> &Arc<RouterServices> {
        &self.services
    }

    /// Feedback on a turn of any session.
    ///
    /// # Errors
    /// See [`RouterServices::provide_feedback`].
    pub fn provide_feedback(&self, turn_id: TurnId, positive: bool) -> Result<Option<f32>> {
        self.services.provide_feedback(turn_id, positive)
    }

    /// Resolve one query. Never fails; degraded answers carry low confidence.
    #[instrument(skip(self, query), fields(session = %self.log.session_id(), interaction = tracing::field::Empty))]
    pub async fn resolve(&mut self, query: &str) -> Resolution {
        let start = Instant::now();
        self.interaction += 1;
        let interaction = self.interaction;
        tracing::Span::current().record("interaction", interaction);

        let mut memory_attempted = false;
        let mut state = RouterState::Start;
        let candidate = loop {
            state = match state {
                RouterState::Start => {
                    if self.memory_gate_open(interaction).await {
                        RouterState::TryMemory
                    } else {
                        RouterState::TryProvider
                    }
                }
                RouterState::TryMemory => {
                    memory_attempted = true;
                    self.services.counters.memory_attempts.fetch_add(1, Ordering::Relaxed);
                    match self.lookup_memory(query).await {
                        Some(hit) => RouterState::Done(Candidate {
                            raw: hit.entry.answer,
                            source: ResponseSource::Memory,
                            confidence: hit.confidence,
                            reused: Some(hit.entry.id),
                        }),
                        None => RouterState::TryProvider,
                    }
                }
                RouterState::TryProvider => {
                    let context = self.log.context_window(self.services.config.router.context_turns);
                    match dispatch::dispatch(&self.services, query, &context).await {
                        Some(answer) => RouterState::Done(Self::provider_candidate(answer)),
                        None => RouterState::TryFallback,
                    }
                }
                RouterState::TryFallback => RouterState::Done(self.fallback(query)),
                RouterState::Done(candidate) => break candidate,
            };
        };

        self.finish(query, candidate, interaction, memory_attempted, start).await
    }

    async fn memory_gate_open(&self, interaction: u64) -> bool {
        let router = &self.services.config.router;
        if router.memory_every_n == 0 || interaction % router.memory_every_n != 0 {
            return false;
        }
        let min_entries = router.min_memory_entries;
        match self.services.blocking(|s| s.memory.len()).await {
            Ok(n) => n >= min_entries,
            Err(e) => {
                warn!(error = %e, "Could not size memory store, skipping memory");
                false
            }
        }
    }

    async fn lookup_memory(&self, query: &str) -> Option<MemoryMatch> {
        let threshold = self.services.config.memory.similarity_threshold;
        let query = query.to_owned();
        match self.services.blocking(move |s| s.memory.find_similar(&query, threshold)).await {
            Ok(hit) => {
                if hit.is_none() {
                    debug!("Memory miss");
                }
                hit
            }
            Err(e) => {
                warn!(error = %e, "Memory lookup failed, trying providers");
                None
            }
        }
    }

    fn provider_candidate(answer: ProviderAnswer) -> Candidate {
        Candidate {
            raw: answer.text,
            source: ResponseSource::Provider(answer.provider),
            confidence: answer.confidence,
            reused: None,
        }
    }

    fn fallback(&self, query: &str) -> Candidate {
        let cache = &self.services.cache;
        let fingerprint = text::fingerprint(query);
        if let Some(text) = cache.get(&fingerprint) {
            self.services.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Fallback cache hit");
            return Candidate {
                raw: text,
                source: ResponseSource::Fallback,
                confidence: CACHE_HIT_CONFIDENCE,
                reused: None,
            };
        }

        let local = cache.generate_local(query);
        debug!(category = local.category.unwrap_or("generic"), "Generated local answer");
        cache.put(&fingerprint, &local.text);
        Candidate {
            raw: local.text,
            source: ResponseSource::Fallback,
            confidence: local.confidence,
            reused: None,
        }
    }

    async fn finish(
        &mut self,
        query: &str,
        candidate: Candidate,
        interaction: u64,
        memory_attempted: bool,
        start: Instant,
    ) -> Resolution {
        let services = Arc::clone(&self.services);
        let confidence = clamp_unit(candidate.confidence);
        let rewritten = services.rewriter.rewrite(&candidate.raw, interaction);

        let memory_id = match candidate.reused {
            Some(id) => {
                if let Err(e) = services.blocking(move |s| s.memory.record_usage(id)).await {
                    warn!(entry = %id, error = %e, "Failed to record memory reuse");
                }
                Some(id)
            }
            None => {
                if candidate.source.is_provider() {
                    services.cache.put(&text::fingerprint(query), &candidate.raw);
                }
                let label = match &candidate.source {
                    ResponseSource::Provider(name) => name.clone(),
                    _ => FALLBACK_LABEL.to_owned(),
                };
                let (query, raw, delivered) =
                    (query.to_owned(), candidate.raw.clone(), rewritten.clone());
                let stored = services
                    .blocking(move |s| s.memory.remember(&query, &raw, &delivered, &label, confidence))
                    .await;
                match stored {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(error = %e, "Failed to store memory entry");
                        None
                    }
                }
            }
        };

        let latency = start.elapsed();
        let mut turn = ConversationTurn::new(
            self.log.session_id(),
            query,
            candidate.raw,
            rewritten.clone(),
            candidate.source.clone(),
            confidence,
        );
        turn.processing_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        turn.memory_id = memory_id;
        let turn_id = turn.id;
        if let Some(backend) = self.log.backend().map(Arc::clone) {
            let persisted = turn.clone();
            if let Err(e) = services.blocking(move |_| backend.put_turn(&persisted)).await {
                warn!(turn = %turn_id, error = %e, "Failed to persist conversation turn");
            }
        }
        self.log.append_persisted(turn);

        services.counters.record_resolution(&candidate.source);
        if services.maintenance_due() {
            let ran = services
                .blocking(|s| {
                    s.run_maintenance();
                    Ok(())
                })
                .await;
            if let Err(e) = ran {
                warn!(error = %e, "Maintenance task failed");
            }
        }

        info!(
            source = %candidate.source,
            confidence,
            latency_ms = latency.as_millis(),
            memory_attempted,
            "Query resolved"
        );

        Resolution {
            text: rewritten,
            source: candidate.source,
            confidence,
            latency,
            used_memory: candidate.reused.is_some(),
            turn_id,
            interaction,
            memory_attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::config::RecallConfig;
    use recall_llm::ProviderSet;

    fn services(config: RecallConfig) -> Arc<RouterServices> {
        RouterServices::build(config, ProviderSet::default()).expect("fallback-only services")
    }

    fn fallback_only() -> RecallConfig {
        let mut config = RecallConfig::default();
        config.providers.clear();
        config.router.rewrite_seed = Some(1);
        config
    }

    #[tokio::test]
    async fn fallback_only_router_answers() {
        let mut router = QueryRouter::new(services(fallback_only()));
        let res = router.resolve("hello there").await;
        assert!(!res.text.is_empty());
        assert_eq!(res.source, ResponseSource::Fallback);
        assert!(res.confidence <= 0.6);
        assert_eq!(res.interaction, 1);
        assert_eq!(router.log().len(), 1);
    }

    #[tokio::test]
    async fn gate_respects_corpus_size() {
        let mut config = fallback_only();
        config.router.memory_every_n = 1;
        config.router.min_memory_entries = 3;
        let mut router = QueryRouter::new(services(config));

        // Each fallback answer is stored, so the corpus grows by one per query.
        let attempted: Vec<bool> = {
            let mut v = Vec::new();
            for q in ["alpha one", "beta two", "gamma three", "delta four"] {
                v.push(router.resolve(q).await.memory_attempted);
            }
            v
        };
        assert_eq!(attempted, vec![false, false, false, true]);
    }

    #[tokio::test]
    async fn resume_continues_counter() {
        let services = services(fallback_only());
        let mut first = QueryRouter::new(Arc::clone(&services));
        first.resolve("hello").await;
        first.resolve("thanks").await;

        let resumed = QueryRouter::resume(Arc::clone(&services), first.session_id()).expect("resume");
        assert_eq!(resumed.interaction_count(), 2);
        assert_eq!(resumed.log().len(), 2);
    }
}

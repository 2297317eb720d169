//! End-to-end resolution tests with scripted providers.
//!
//! Providers here never touch the network: each one replays a script of
//! answers, failures and hangs. Tests that depend on backoff or timeouts run
//! on paused tokio time so they finish instantly and measure exact delays.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use recall_core::config::{ProviderConfig, RecallConfig};
use recall_core::conversation::{ContextTurn, ConversationTurn};
use recall_core::error::{RecallError, Result as StoreResult};
use recall_core::memory::MemoryEntry;
use recall_core::persistence::{InMemoryBackend, MemoryBackend, ScannedEntry};
use recall_core::types::{MemoryId, ResponseSource, SessionId, TurnId};
use recall_llm::{AnswerProvider, ProviderError, ProviderReply, ProviderSet};
use recall_router::{QueryRouter, RouterServices};

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Step {
    Answer(&'static str),
    Transient,
    Fatal,
    Hang,
    Empty,
}

struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    cost: Option<f64>,
}

impl ScriptedProvider {
    fn new(name: &str, script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            cost: None,
        })
    }

    fn always(name: &str) -> Arc<Self> {
        Self::new(name, Vec::new())
    }

    fn with_cost(name: &str, cost: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            cost: Some(cost),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        query: &str,
        _context: &[ContextTurn],
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front();
        match step {
            None => {
                let reply = ProviderReply::new(format!("{} says: {query}", self.name));
                Ok(match self.cost {
                    Some(cost) => reply.with_cost(cost),
                    None => reply,
                })
            }
            Some(Step::Answer(text)) => Ok(ProviderReply::new(text)),
            Some(Step::Transient) => Err(ProviderError::HttpStatus {
                status: 503,
                body: "overloaded".into(),
            }),
            Some(Step::Fatal) => Err(ProviderError::HttpStatus {
                status: 400,
                body: "bad request".into(),
            }),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProviderReply::new("too late"))
            }
            Some(Step::Empty) => Ok(ProviderReply::new("   ")),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn base_config() -> RecallConfig {
    let mut config = RecallConfig::default();
    config.router.rewrite_seed = Some(1);
    config.router.retry_delay_ms = 100;
    config.router.request_timeout_ms = 1_000;
    config
}

fn build(config: RecallConfig, adapters: &[Arc<ScriptedProvider>]) -> Arc<RouterServices> {
    let mut set = ProviderSet::new();
    for adapter in adapters {
        set.insert(Arc::clone(adapter) as Arc<dyn AnswerProvider>);
    }
    RouterServices::build(config, set).expect("valid services")
}

fn seed_metaverse(services: &RouterServices) -> MemoryEntry {
    let entry = MemoryEntry::new(
        "what is the metaverse",
        "A network of shared virtual worlds.",
        "A network of shared virtual worlds.",
        "alpha",
        0.9,
        Utc::now(),
    );
    services.memory().store(&entry).expect("seed");
    entry
}

// ---------------------------------------------------------------------------
// Basic contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_query_gets_an_answer() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_daily_quota(2));
    let alpha = ScriptedProvider::new("alpha", vec![Step::Fatal, Step::Fatal]);
    let mut router = QueryRouter::new(build(config, &[alpha]));

    for query in ["hello", "", "???", "what time is it", "explain quantum gravity"] {
        let res = router.resolve(query).await;
        assert!(!res.text.trim().is_empty(), "empty answer for {query:?}");
        assert!((0.0..=1.0).contains(&res.confidence));
    }
}

#[tokio::test]
async fn memory_hit_discounts_confidence() {
    let mut config = base_config();
    config.router.memory_every_n = 1;
    config.router.min_memory_entries = 1;
    let services = build(config, &[]);
    let entry = seed_metaverse(&services);

    let mut router = QueryRouter::new(Arc::clone(&services));
    let res = router.resolve("What is the metaverse?").await;

    assert_eq!(res.source, ResponseSource::Memory);
    assert!(res.used_memory);
    assert!(res.memory_attempted);
    assert!(res.confidence <= 0.9);
    assert!(res.confidence > 0.6);

    let stored = services.memory().get(entry.id).expect("get").expect("entry");
    assert_eq!(stored.usage_count, 1);
    // The stored delivery text is the first one; reuse does not overwrite it.
    assert_eq!(stored.rewritten_answer, entry.rewritten_answer);
    // Reuse records usage instead of storing a copy.
    assert_eq!(services.memory().len().expect("len"), 1);
}

#[tokio::test]
async fn memory_gate_fires_on_every_third_interaction() {
    let mut config = base_config();
    config.router.memory_every_n = 3;
    config.router.min_memory_entries = 1;
    let services = build(config, &[]);
    seed_metaverse(&services);

    let mut router = QueryRouter::new(Arc::clone(&services));
    let mut attempted = Vec::new();
    for query in ["apples", "bicycles", "canyons", "dolphins", "engines", "forests"] {
        let res = router.resolve(query).await;
        if res.memory_attempted {
            attempted.push(res.interaction);
        }
    }
    assert_eq!(attempted, vec![3, 6]);
    assert_eq!(services.counters().snapshot().memory_attempts, 2);
}

#[tokio::test]
async fn memory_miss_degrades_to_provider() {
    let mut config = base_config();
    config.router.memory_every_n = 1;
    config.router.min_memory_entries = 1;
    config.providers.push(ProviderConfig::named("alpha"));
    let alpha = ScriptedProvider::always("alpha");
    let services = build(config, &[Arc::clone(&alpha)]);
    seed_metaverse(&services);

    let mut router = QueryRouter::new(services);
    let res = router.resolve("how do volcanoes erupt").await;
    assert!(res.memory_attempted);
    assert_eq!(res.source, ResponseSource::Provider("alpha".into()));
    assert_eq!(alpha.calls(), 1);
}

// ---------------------------------------------------------------------------
// Quota and end-to-end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quota_of_one_then_fallback() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_daily_quota(1));
    let alpha = ScriptedProvider::always("alpha");
    let services = build(config, &[Arc::clone(&alpha)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let first = router.resolve("tell me about rivers").await;
    assert_eq!(first.source, ResponseSource::Provider("alpha".into()));
    let usage = services.registry().usage("alpha").expect("registered");
    assert_eq!(usage.used_today, usage.daily_quota);

    let second = router.resolve("tell me about mountains").await;
    assert!(!second.memory_attempted);
    assert_eq!(second.source, ResponseSource::Fallback);
    assert!(second.confidence <= 0.6);
    assert_eq!(alpha.calls(), 1);
}

#[tokio::test]
async fn provider_answers_are_stored_and_cached() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_daily_quota(1));
    let alpha = ScriptedProvider::always("alpha");
    let services = build(config, &[alpha]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    router.resolve("Tell me about rivers").await;
    assert_eq!(services.memory().len().expect("len"), 1);
    assert_eq!(services.cache().len(), 1);

    // Quota is gone; the same question is answered from the cache.
    let again = router.resolve("tell me about rivers!").await;
    assert_eq!(again.source, ResponseSource::Fallback);
    assert!(again.text.contains("alpha says"));
    assert_eq!(services.counters().snapshot().cache_hits, 1);
}

// ---------------------------------------------------------------------------
// Retries, timeouts and rotation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_with_linear_backoff() {
    let mut config = base_config();
    config.router.max_retries = 3;
    config.providers.push(ProviderConfig::named("alpha"));
    let alpha = ScriptedProvider::new(
        "alpha",
        vec![Step::Transient, Step::Transient, Step::Answer("third time lucky")],
    );
    let services = build(config, &[Arc::clone(&alpha)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("anything at all").await;
    assert_eq!(res.source, ResponseSource::Provider("alpha".into()));
    assert!(res.text.starts_with("third time lucky"));
    assert_eq!(alpha.calls(), 3);
    // 100ms after attempt 1, 200ms after attempt 2.
    assert!(res.latency >= Duration::from_millis(300));

    let snapshot = services.counters().snapshot();
    assert_eq!(snapshot.provider_failures, 2);
    // Failed attempts release their quota slot.
    assert_eq!(services.registry().usage("alpha").expect("usage").used_today, 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failure_and_rotates() {
    let mut config = base_config();
    config.router.max_retries = 1;
    config.providers.push(ProviderConfig::named("alpha").with_priority(0));
    config.providers.push(ProviderConfig::named("beta").with_priority(1));
    let alpha = ScriptedProvider::new("alpha", vec![Step::Hang]);
    let beta = ScriptedProvider::always("beta");
    let services = build(config, &[Arc::clone(&alpha), Arc::clone(&beta)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("slow question").await;
    assert_eq!(res.source, ResponseSource::Provider("beta".into()));
    assert!(res.latency >= Duration::from_secs(1));

    let health = services.health().get("alpha").expect("alpha health");
    assert_eq!(health.failed_requests, 1);
    assert_eq!(health.consecutive_failures, 1);
    assert_eq!(services.registry().usage("alpha").expect("usage").used_today, 0);
}

#[tokio::test(start_paused = true)]
async fn non_transient_error_skips_remaining_retries() {
    let mut config = base_config();
    config.router.max_retries = 3;
    config.providers.push(ProviderConfig::named("alpha").with_priority(0));
    config.providers.push(ProviderConfig::named("beta").with_priority(1));
    let alpha = ScriptedProvider::new("alpha", vec![Step::Fatal]);
    let beta = ScriptedProvider::always("beta");
    let services = build(config, &[Arc::clone(&alpha), Arc::clone(&beta)]);
    let mut router = QueryRouter::new(services);

    let res = router.resolve("bad request").await;
    assert_eq!(alpha.calls(), 1);
    assert_eq!(res.source, ResponseSource::Provider("beta".into()));
    assert!(res.latency < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn empty_answers_are_failures() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha"));
    let alpha = ScriptedProvider::new("alpha", vec![Step::Empty]);
    let services = build(config, &[Arc::clone(&alpha)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("say nothing").await;
    assert_eq!(alpha.calls(), 1);
    assert_eq!(res.source, ResponseSource::Fallback);
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_falls_back() {
    let mut config = base_config();
    config.router.max_retries = 2;
    config.providers.push(ProviderConfig::named("alpha").with_priority(0));
    config.providers.push(ProviderConfig::named("beta").with_priority(1));
    let failing = vec![Step::Transient, Step::Transient];
    let alpha = ScriptedProvider::new("alpha", failing.clone());
    let beta = ScriptedProvider::new("beta", failing);
    let services = build(config, &[Arc::clone(&alpha), Arc::clone(&beta)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("hello").await;
    assert_eq!(res.source, ResponseSource::Fallback);
    assert!(res.confidence <= 0.6);
    assert_eq!(alpha.calls() + beta.calls(), 4);
    assert_eq!(services.counters().snapshot().provider_failures, 4);
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_denial_goes_to_fallback() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_rate_limits(1, 100));
    let alpha = ScriptedProvider::always("alpha");
    let services = build(config, &[Arc::clone(&alpha)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let first = router.resolve("first question").await;
    let second = router.resolve("second question").await;
    assert_eq!(first.source, ResponseSource::Provider("alpha".into()));
    assert_eq!(second.source, ResponseSource::Fallback);
    assert_eq!(alpha.calls(), 1);
    assert_eq!(services.counters().snapshot().rate_limited, 1);
}

#[tokio::test]
async fn rate_limit_denial_can_rotate() {
    let mut config = base_config();
    config.router.rotate_on_rate_limit = true;
    config.providers.push(ProviderConfig::named("alpha").with_priority(0).with_rate_limits(1, 100));
    config.providers.push(ProviderConfig::named("beta").with_priority(1));
    let alpha = ScriptedProvider::always("alpha");
    let beta = ScriptedProvider::always("beta");
    let services = build(config, &[alpha, beta]);
    let mut router = QueryRouter::new(services);

    router.resolve("first question").await;
    let second = router.resolve("second question").await;
    assert_eq!(second.source, ResponseSource::Provider("beta".into()));
}

// ---------------------------------------------------------------------------
// Feedback and metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn feedback_adjusts_stored_entry() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha"));
    let services = build(config, &[ScriptedProvider::always("alpha")]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("describe a lighthouse").await;
    let boosted = router
        .provide_feedback(res.turn_id, true)
        .expect("feedback")
        .expect("turn has an entry");
    assert!((boosted - 0.55).abs() < 1e-6);

    let lowered = services
        .provide_feedback(res.turn_id, false)
        .expect("feedback")
        .expect("turn has an entry");
    assert!((lowered - 0.495).abs() < 1e-6);
}

#[tokio::test]
async fn feedback_on_memory_hit_targets_reused_entry() {
    let mut config = base_config();
    config.router.memory_every_n = 1;
    config.router.min_memory_entries = 1;
    let services = build(config, &[]);
    let entry = seed_metaverse(&services);
    let mut router = QueryRouter::new(Arc::clone(&services));

    let res = router.resolve("what is the metaverse").await;
    assert!(res.used_memory);
    router.provide_feedback(res.turn_id, false).expect("feedback");

    let stored = services.memory().get(entry.id).expect("get").expect("entry");
    assert!(stored.effectiveness < entry.effectiveness);
}

#[tokio::test]
async fn feedback_on_unknown_turn_is_an_error() {
    let services = build(base_config(), &[]);
    let err = services.provide_feedback(TurnId::new(), true).expect_err("unknown turn");
    assert!(matches!(err, RecallError::TurnNotFound(_)));
}

#[tokio::test]
async fn metrics_report_counts_sources_and_cost() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_daily_quota(1));
    let services = build(config, &[ScriptedProvider::with_cost("alpha", 0.25)]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    router.resolve("tell me about rivers").await;
    router.resolve("hello there").await;

    let report = services.metrics();
    assert_eq!(report.total_requests, 2);
    assert_eq!(report.memory_hits, 0);
    assert_eq!(report.provider_hits_by_name.get("alpha"), Some(&1));
    assert_eq!(report.fallback_hits, 1);
    assert!((report.cost_accrued - 0.25).abs() < 1e-9);
    assert_eq!(report.cache_size, 2);
    assert_eq!(report.memory_entries, Some(2));
    assert_eq!(report.providers.len(), 1);
    assert!(!report.providers[0].degraded);

    let text = report.to_prometheus();
    assert!(text.contains("recall_requests_total 2"));
    assert!(text.contains("recall_provider_hits_total{provider=\"alpha\"} 1"));
    assert!(text.contains("recall_provider_quota_used{provider=\"alpha\"} 1"));
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn enabled_provider_without_adapter_is_fatal() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha"));
    let err = RouterServices::build(config, ProviderSet::new()).expect_err("missing adapter");
    assert!(matches!(err, RecallError::Config(_)));
}

#[test]
fn no_providers_and_no_cache_is_fatal() {
    let mut config = base_config();
    config.cache.capacity = 0;
    let err = RouterServices::build(config, ProviderSet::new()).expect_err("nothing to answer with");
    assert!(matches!(err, RecallError::Config(_)));
}

#[test]
fn unknown_persona_is_fatal() {
    let mut config = base_config();
    config.router.persona = "pirate".into();
    let err = RouterServices::build(config, ProviderSet::new()).expect_err("bad persona");
    assert!(matches!(err, RecallError::Config(_)));
}

#[test]
fn disabled_provider_needs_no_adapter() {
    let mut config = base_config();
    let mut disabled = ProviderConfig::named("alpha");
    disabled.enabled = false;
    config.providers.push(disabled);
    assert!(RouterServices::build(config, ProviderSet::new()).is_ok());
}

// ---------------------------------------------------------------------------
// Concurrency, determinism, maintenance
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_routers_share_quota() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha").with_daily_quota(3));
    let alpha = ScriptedProvider::always("alpha");
    let services = build(config, &[Arc::clone(&alpha)]);

    let mut handles = Vec::new();
    for i in 0..8 {
        let services = Arc::clone(&services);
        handles.push(tokio::spawn(async move {
            let mut router = QueryRouter::new(services);
            router.resolve(&format!("question number {i}")).await
        }));
    }

    let mut provider_answers = 0;
    for handle in handles {
        let res = handle.await.expect("task");
        if res.source.is_provider() {
            provider_answers += 1;
        }
    }
    assert_eq!(provider_answers, 3);
    assert_eq!(alpha.calls(), 3);
    assert_eq!(services.registry().usage("alpha").expect("usage").used_today, 3);
}

/// Backend whose first scan parks until a release signal arrives.
struct GatedBackend {
    inner: InMemoryBackend,
    scanning: Arc<Notify>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl MemoryBackend for GatedBackend {
    fn put_entry(&self, entry: &MemoryEntry) -> StoreResult<()> {
        self.inner.put_entry(entry)
    }
    fn get_entry(&self, id: MemoryId) -> StoreResult<Option<MemoryEntry>> {
        self.inner.get_entry(id)
    }
    fn scan_entries(&self) -> StoreResult<Vec<ScannedEntry>> {
        let gate = self.release.lock().take();
        if let Some(release) = gate {
            self.scanning.notify_one();
            // Give up after ten seconds.
            let _ = release.recv_timeout(Duration::from_secs(10));
        }
        self.inner.scan_entries()
    }
    fn delete_entry(&self, id: MemoryId) -> StoreResult<bool> {
        self.inner.delete_entry(id)
    }
    fn delete_key(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete_key(key)
    }
    fn entry_count(&self) -> StoreResult<usize> {
        self.inner.entry_count()
    }
    fn put_turn(&self, turn: &ConversationTurn) -> StoreResult<()> {
        self.inner.put_turn(turn)
    }
    fn get_turn(&self, id: TurnId) -> StoreResult<Option<ConversationTurn>> {
        self.inner.get_turn(id)
    }
    fn session_turns(&self, session: SessionId) -> StoreResult<Vec<ConversationTurn>> {
        self.inner.session_turns(session)
    }
    fn delete_turn(&self, id: TurnId) -> StoreResult<bool> {
        self.inner.delete_turn(id)
    }
    fn delete_turns_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.inner.delete_turns_before(cutoff)
    }
}

/// Answers every call and releases the parked scan on its way out.
struct ReleasingProvider {
    release: Mutex<Option<mpsc::Sender<()>>>,
}

#[async_trait]
impl AnswerProvider for ReleasingProvider {
    fn name(&self) -> &str {
        "alpha"
    }

    async fn call(
        &self,
        _query: &str,
        _context: &[ContextTurn],
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        if let Some(release) = self.release.lock().take() {
            let _ = release.send(());
        }
        Ok(ProviderReply::new("Magma pushes up through the crust."))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn provider_call_completes_during_slow_memory_scan() {
    let (release_tx, release_rx) = mpsc::channel();
    let scanning = Arc::new(Notify::new());
    let backend = Arc::new(GatedBackend {
        inner: InMemoryBackend::new(),
        scanning: Arc::clone(&scanning),
        release: Mutex::new(Some(release_rx)),
    });

    let mut config = base_config();
    config.router.memory_every_n = 1;
    config.router.min_memory_entries = 1;
    config.providers.push(ProviderConfig::named("alpha"));
    let mut set = ProviderSet::new();
    set.insert(Arc::new(ReleasingProvider {
        release: Mutex::new(Some(release_tx)),
    }) as Arc<dyn AnswerProvider>);
    let services = RouterServices::build_with_backend(config, set, backend).expect("services");
    seed_metaverse(&services);

    let scanner = {
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            let mut router = QueryRouter::new(services);
            router.resolve("what is the metaverse").await
        })
    };
    scanning.notified().await;

    // The only worker must stay free while the first router's scan is parked.
    let asker = {
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            let mut router = QueryRouter::new(services);
            router.resolve("how do volcanoes erupt").await
        })
    };
    let answered = tokio::time::timeout(Duration::from_secs(5), asker)
        .await
        .expect("provider answered while the scan was parked")
        .expect("task");
    assert_eq!(answered.source, ResponseSource::Provider("alpha".into()));

    let reused = scanner.await.expect("task");
    assert_eq!(reused.source, ResponseSource::Memory);
}

#[tokio::test]
async fn fixed_seed_gives_identical_sessions() {
    let run = || async {
        let mut config = base_config();
        config.router.persona = "playful".into();
        config.router.rewrite_seed = Some(42);
        let mut router = QueryRouter::new(build(config, &[]));
        let mut texts = Vec::new();
        for query in ["hello", "what time is it", "thanks a lot", "tell me about technology"] {
            texts.push(router.resolve(query).await.text);
        }
        texts
    };
    assert_eq!(run().await, run().await);
}

#[tokio::test]
async fn maintenance_enforces_size_cap() {
    let mut config = base_config();
    config.memory.cleanup_every_n = 2;
    config.memory.max_entries = 1;
    let services = build(config, &[]);
    let mut router = QueryRouter::new(Arc::clone(&services));

    for query in ["apples", "bicycles", "canyons", "dolphins"] {
        router.resolve(query).await;
    }
    assert_eq!(services.counters().snapshot().maintenance_runs, 2);
    assert_eq!(services.memory().len().expect("len"), 1);
}

#[tokio::test]
async fn resumed_session_feeds_context() {
    let mut config = base_config();
    config.providers.push(ProviderConfig::named("alpha"));
    let services = build(config, &[ScriptedProvider::always("alpha")]);

    let session = {
        let mut router = QueryRouter::new(Arc::clone(&services));
        router.resolve("first").await;
        router.resolve("second").await;
        router.session_id()
    };

    let mut resumed = QueryRouter::resume(Arc::clone(&services), session).expect("resume");
    assert_eq!(resumed.log().context_window(5).len(), 2);
    let res = resumed.resolve("third").await;
    assert_eq!(res.interaction, 3);
    assert_eq!(resumed.log().len(), 3);
}

#[tokio::test]
async fn sqlite_session_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("recall.db");
    let sqlite_config = || {
        let mut config = base_config();
        config.persistence.backend = "sqlite".into();
        config.persistence.path = path.display().to_string();
        config
    };

    let (session, turn_id) = {
        let services = build(sqlite_config(), &[]);
        let mut router = QueryRouter::new(services);
        let res = router.resolve("hello from before the restart").await;
        (router.session_id(), res.turn_id)
    };

    let services = build(sqlite_config(), &[]);
    assert_eq!(services.memory().len().expect("len"), 1);
    let resumed = QueryRouter::resume(Arc::clone(&services), session).expect("resume");
    assert_eq!(resumed.log().len(), 1);
    assert!(services.provide_feedback(turn_id, true).expect("feedback").is_some());
}

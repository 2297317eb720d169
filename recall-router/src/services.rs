//! State shared by every router instance.
//!
//! One [`RouterServices`] is built at startup and handed to each
//! [`QueryRouter`](crate::QueryRouter) behind an `Arc`. The registry, rate
//! limiter and health tracker lock per provider; the memory store and cache
//! lock internally. Nothing here is held across an `.await`, and store I/O
//! runs on tokio's blocking pool through [`RouterServices::blocking`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use recall_core::cache::FallbackCache;
use recall_core::config::RecallConfig;
use recall_core::error::{RecallError, Result};
use recall_core::memory::MemoryStore;
use recall_core::metrics::ResolutionCounters;
use recall_core::persistence::{self, MemoryBackend};
use recall_core::rewrite::ResponseRewriter;
use recall_llm::{HealthTracker, ProviderRegistry, ProviderSet, RateLimiter};
use tracing::{info, warn};

/// Shared registry, limiter, store, cache and counters.
pub struct RouterServices {
    pub(crate) config: RecallConfig,
    pub(crate) registry: ProviderRegistry,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) providers: ProviderSet,
    pub(crate) health: HealthTracker,
    pub(crate) memory: MemoryStore,
    pub(crate) cache: FallbackCache,
    pub(crate) counters: ResolutionCounters,
    pub(crate) rewriter: ResponseRewriter,
    backend: Arc<dyn MemoryBackend>,
    maintenance_tick: AtomicU64,
}

impl std::fmt::Debug for RouterServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterServices")
            .field("providers", &self.registry.names())
            .field("persona", &self.rewriter.persona())
            .field("cache_capacity", &self.cache.capacity())
            .finish_non_exhaustive()
    }
}

impl RouterServices {
    /// Build services, opening the persistence backend named in the config.
    ///
    /// # Errors
    /// [`RecallError::Config`] for invalid configuration, enabled providers
    /// without an adapter, or no providers together with an unusable cache.
    /// Persistence failures are propagated.
    pub fn build(config: RecallConfig, providers: ProviderSet) -> Result<Arc<Self>> {
        config.validate()?;
        let backend = persistence::open_backend(&config.persistence)?;
        Self::build_with_backend(config, providers, backend)
    }

    /// Build services over an already opened backend.
    ///
    /// # Errors
    /// Same as [`build`](Self::build), minus opening the backend.
    pub fn build_with_backend(
        config: RecallConfig,
        providers: ProviderSet,
        backend: Arc<dyn MemoryBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = ProviderRegistry::from_configs(&config.providers)?;
        let rate_limiter = RateLimiter::new();
        for provider in &config.providers {
            if provider.enabled && !providers.contains(&provider.name) {
                return Err(RecallError::Config(format!(
                    "no adapter for enabled provider '{}'",
                    provider.name
                )));
            }
            rate_limiter.register(&provider.name, provider.rate_limits);
        }

        let cache = FallbackCache::new(&config.cache);
        let any_enabled = config.providers.iter().any(|p| p.enabled);
        if !any_enabled {
            if !cache.is_usable() {
                return Err(RecallError::Config(
                    "no providers registered and the fallback cache has zero capacity".into(),
                ));
            }
            warn!("No enabled providers; every answer will come from memory or fallback");
        }

        let persona = config.router.persona()?;
        let base_seed = config.router.rewrite_seed.unwrap_or_else(rand::random);
        let memory = MemoryStore::new(Arc::clone(&backend), config.memory.clone());

        info!(
            providers = registry.len(),
            %persona,
            backend = %config.persistence.backend,
            cache_capacity = cache.capacity(),
            "Router services ready"
        );

        Ok(Arc::new(Self {
            registry,
            rate_limiter,
            providers,
            health: HealthTracker::new(),
            memory,
            cache,
            counters: ResolutionCounters::new(),
            rewriter: ResponseRewriter::new(persona, base_seed),
            backend,
            maintenance_tick: AtomicU64::new(0),
            config,
        }))
    }

    /// The configuration the services were built from.
    #[must_use]
    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    /// The memory store.
    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The fallback cache.
    #[must_use]
    pub fn cache(&self) -> &FallbackCache {
        &self.cache
    }

    /// The provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Per-provider health.
    #[must_use]
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Resolution counters.
    #[must_use]
    pub fn counters(&self) -> &ResolutionCounters {
        &self.counters
    }

    /// The persistence backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    /// Run store work on tokio's blocking pool so a long scan or a slow disk
    /// does not stall the runtime's workers.
    ///
    /// # Errors
    /// Whatever `work` returns, or [`RecallError::Io`] if the task panicked
    /// or was cancelled.
    pub(crate) async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RouterServices) -> Result<T> + Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&services))
            .await
            .map_err(|e| RecallError::Io(std::io::Error::other(e)))?
    }

    /// Count one finished resolution toward maintenance. Returns whether a
    /// maintenance pass is due.
    pub(crate) fn maintenance_due(&self) -> bool {
        let every = self.config.memory.cleanup_every_n;
        if every == 0 {
            return false;
        }
        let tick = self.maintenance_tick.fetch_add(1, Ordering::Relaxed) + 1;
        tick % every == 0
    }

    /// Drop stale entries and enforce the size cap.
    pub fn run_maintenance(&self) {
        let memory_config = &self.config.memory;
        match self.memory.cleanup(memory_config.max_memory_age_days) {
            Ok(report) if report.malformed > 0 => {
                warn!(malformed = report.malformed, "Malformed rows found during cleanup");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Memory cleanup failed"),
        }
        if let Err(e) = self.memory.trim_to(memory_config.max_entries) {
            warn!(error = %e, "Memory trim failed");
        }
        self.counters.maintenance_runs.fetch_add(1, Ordering::Relaxed);
    }
}

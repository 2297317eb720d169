//! Metrics and report interface.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use recall_core::metrics::ResolutionSnapshot;
use recall_llm::{ProviderHealth, ProviderUsage};
use serde::Serialize;
use tracing::warn;

use crate::services::RouterServices;

/// Usage and health of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    /// Quota and cost accounting.
    pub usage: ProviderUsage,
    /// Connection health, `None` if never called.
    pub health: Option<ProviderHealth>,
    /// Whether the provider is failing repeatedly.
    pub degraded: bool,
}

/// Point-in-time view of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    /// Queries resolved.
    pub total_requests: u64,
    /// Queries answered from memory.
    pub memory_hits: u64,
    /// Provider answers by provider name.
    pub provider_hits_by_name: BTreeMap<String, u64>,
    /// Queries answered by the fallback path.
    pub fallback_hits: u64,
    /// Total cost of provider calls.
    pub cost_accrued: f64,
    /// Entries in the fallback cache.
    pub cache_size: usize,
    /// Interactions on which memory was consulted.
    pub memory_attempts: u64,
    /// Fallback answers served from the cache.
    pub cache_hits: u64,
    /// Failed provider attempts.
    pub provider_failures: u64,
    /// Rate-limiter refusals.
    pub rate_limited: u64,
    /// Rows in the memory store, `None` if the backend could not be read.
    pub memory_entries: Option<usize>,
    /// Per-provider usage and health, in priority order.
    pub providers: Vec<ProviderReport>,
}

impl MetricsReport {
    fn from_parts(
        snapshot: ResolutionSnapshot,
        cache_size: usize,
        memory_entries: Option<usize>,
        providers: Vec<ProviderReport>,
    ) -> Self {
        Self {
            total_requests: snapshot.total_requests,
            memory_hits: snapshot.memory_hits,
            provider_hits_by_name: snapshot.provider_hits,
            fallback_hits: snapshot.fallback_hits,
            cost_accrued: snapshot.cost_accrued,
            cache_size,
            memory_attempts: snapshot.memory_attempts,
            cache_hits: snapshot.cache_hits,
            provider_failures: snapshot.provider_failures,
            rate_limited: snapshot.rate_limited,
            memory_entries,
            providers,
        }
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            "# HELP recall_requests_total Queries resolved\n\
             # TYPE recall_requests_total counter\n\
             recall_requests_total {}\n\
             # HELP recall_memory_hits_total Queries answered from memory\n\
             # TYPE recall_memory_hits_total counter\n\
             recall_memory_hits_total {}\n\
             # HELP recall_fallback_hits_total Queries answered by fallback\n\
             # TYPE recall_fallback_hits_total counter\n\
             recall_fallback_hits_total {}\n\
             # HELP recall_cost_accrued Total provider cost\n\
             # TYPE recall_cost_accrued counter\n\
             recall_cost_accrued {}\n\
             # HELP recall_cache_size Entries in the fallback cache\n\
             # TYPE recall_cache_size gauge\n\
             recall_cache_size {}\n\
             # HELP recall_provider_hits_total Provider answers by provider\n\
             # TYPE recall_provider_hits_total counter\n",
            self.total_requests, self.memory_hits, self.fallback_hits, self.cost_accrued, self.cache_size,
        );
        for (name, hits) in &self.provider_hits_by_name {
            let _ = writeln!(out, "recall_provider_hits_total{{provider=\"{name}\"}} {hits}");
        }

        out.push_str(
            "# HELP recall_provider_quota_used Calls counted against today's quota\n\
             # TYPE recall_provider_quota_used gauge\n",
        );
        for p in &self.providers {
            let _ = writeln!(
                out,
                "recall_provider_quota_used{{provider=\"{}\"}} {}",
                p.usage.name, p.usage.used_today
            );
        }

        out.push_str(
            "# HELP recall_provider_degraded Provider failing repeatedly\n\
             # TYPE recall_provider_degraded gauge\n",
        );
        for p in &self.providers {
            let _ = writeln!(
                out,
                "recall_provider_degraded{{provider=\"{}\"}} {}",
                p.usage.name,
                u8::from(p.degraded)
            );
        }
        out
    }
}

impl RouterServices {
    /// Snapshot counters, cache size and per-provider state.
    #[must_use]
    pub fn metrics(&self) -> MetricsReport {
        let memory_entries = match self.memory.len() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Could not count memory entries");
                None
            }
        };
        let providers = self
            .registry
            .usage_all()
            .into_iter()
            .map(|usage| {
                let health = self.health.get(&usage.name);
                let degraded = health.as_ref().is_some_and(ProviderHealth::is_degraded);
                ProviderReport {
                    usage,
                    health,
                    degraded,
                }
            })
            .collect();

        MetricsReport::from_parts(self.counters.snapshot(), self.cache.len(), memory_entries, providers)
    }
}

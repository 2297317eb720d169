//! Resolution counters.
//!
//! Hot-path counts are `AtomicU64`s; the per-provider hit map and accrued
//! cost sit behind a `parking_lot::Mutex` since they are touched once per
//! provider answer. [`ResolutionCounters::snapshot`] copies everything out
//! for reports and Prometheus export.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::ResponseSource;

/// Counters shared by every router instance.
#[derive(Debug)]
pub struct ResolutionCounters {
    /// Queries resolved.
    pub total_requests: AtomicU64,
    /// Interactions on which memory was consulted.
    pub memory_attempts: AtomicU64,
    /// Queries answered from memory.
    pub memory_hits: AtomicU64,
    /// Queries answered by the fallback path.
    pub fallback_hits: AtomicU64,
    /// Fallback answers served from the cache.
    pub cache_hits: AtomicU64,
    /// Provider attempts that failed or timed out.
    pub provider_failures: AtomicU64,
    /// Provider admissions refused by the rate limiter.
    pub rate_limited: AtomicU64,
    /// Memory maintenance passes run.
    pub maintenance_runs: AtomicU64,
    provider_hits: Mutex<BTreeMap<String, u64>>,
    cost_accrued: Mutex<f64>,
}

impl ResolutionCounters {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            memory_attempts: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            fallback_hits: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            maintenance_runs: AtomicU64::new(0),
            provider_hits: Mutex::new(BTreeMap::new()),
            cost_accrued: Mutex::new(0.0),
        }
    }

    /// Count one finished resolution by its source.
    pub fn record_resolution(&self, source: &ResponseSource) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match source {
            ResponseSource::Memory => {
                self.memory_hits.fetch_add(1, Ordering::Relaxed);
            }
            ResponseSource::Provider(name) => {
                *self.provider_hits.lock().entry(name.clone()).or_insert(0) += 1;
            }
            ResponseSource::Fallback => {
                self.fallback_hits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Add to the accrued cost. Non-finite or negative amounts are ignored.
    pub fn add_cost(&self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            *self.cost_accrued.lock() += amount;
        }
    }

    /// Copy all counters out.
    #[must_use]
    pub fn snapshot(&self) -> ResolutionSnapshot {
        ResolutionSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            memory_attempts: self.memory_attempts.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            provider_hits: self.provider_hits.lock().clone(),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            maintenance_runs: self.maintenance_runs.load(Ordering::Relaxed),
            cost_accrued: *self.cost_accrued.lock(),
        }
    }
}

impl Default for ResolutionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ResolutionCounters`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionSnapshot {
    /// Queries resolved.
    pub total_requests: u64,
    /// Interactions on which memory was consulted.
    pub memory_attempts: u64,
    /// Queries answered from memory.
    pub memory_hits: u64,
    /// Provider answers by provider name.
    pub provider_hits: BTreeMap<String, u64>,
    /// Queries answered by the fallback path.
    pub fallback_hits: u64,
    /// Fallback answers served from the cache.
    pub cache_hits: u64,
    /// Failed provider attempts.
    pub provider_failures: u64,
    /// Rate-limiter refusals.
    pub rate_limited: u64,
    /// Maintenance passes run.
    pub maintenance_runs: u64,
    /// Total cost of provider calls.
    pub cost_accrued: f64,
}

impl ResolutionSnapshot {
    /// Total provider answers across all providers.
    #[must_use]
    pub fn provider_hits_total(&self) -> u64 {
        self.provider_hits.values().sum()
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            "# HELP recall_requests_total Queries resolved\n\
             # TYPE recall_requests_total counter\n\
             recall_requests_total {}\n\
             # HELP recall_memory_attempts_total Interactions that consulted memory\n\
             # TYPE recall_memory_attempts_total counter\n\
             recall_memory_attempts_total {}\n\
             # HELP recall_memory_hits_total Queries answered from memory\n\
             # TYPE recall_memory_hits_total counter\n\
             recall_memory_hits_total {}\n\
             # HELP recall_fallback_hits_total Queries answered by fallback\n\
             # TYPE recall_fallback_hits_total counter\n\
             recall_fallback_hits_total {}\n\
             # HELP recall_cache_hits_total Fallback answers served from cache\n\
             # TYPE recall_cache_hits_total counter\n\
             recall_cache_hits_total {}\n\
             # HELP recall_provider_failures_total Failed provider attempts\n\
             # TYPE recall_provider_failures_total counter\n\
             recall_provider_failures_total {}\n\
             # HELP recall_rate_limited_total Provider admissions refused\n\
             # TYPE recall_rate_limited_total counter\n\
             recall_rate_limited_total {}\n\
             # HELP recall_maintenance_runs_total Memory maintenance passes\n\
             # TYPE recall_maintenance_runs_total counter\n\
             recall_maintenance_runs_total {}\n\
             # HELP recall_cost_accrued Total provider cost\n\
             # TYPE recall_cost_accrued counter\n\
             recall_cost_accrued {}\n\
             # HELP recall_provider_hits_total Provider answers by provider\n\
             # TYPE recall_provider_hits_total counter\n",
            self.total_requests,
            self.memory_attempts,
            self.memory_hits,
            self.fallback_hits,
            self.cache_hits,
            self.provider_failures,
            self.rate_limited,
            self.maintenance_runs,
            self.cost_accrued,
        );
        for (name, hits) in &self.provider_hits {
            let _ = writeln!(out, "recall_provider_hits_total{{provider=\"{name}\"}} {hits}");
        }
        out
    }
}

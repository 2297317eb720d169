//! Per-provider connection health.
//!
//! Tracks request counts, an exponential moving average of latency and the
//! current run of consecutive failures. Health is reported, never used to
//! gate quota: the registry and rate limiter stay the source of truth for
//! whether a provider may be called.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Weight of the newest sample in the latency average.
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Consecutive failures at which a provider is reported as degraded.
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Health counters of one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Calls attempted.
    pub total_requests: u64,
    /// Calls that returned an answer.
    pub successful_requests: u64,
    /// Calls that failed or timed out.
    pub failed_requests: u64,
    /// Moving average latency of all attempts, in milliseconds.
    pub avg_latency_ms: Option<f64>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Last successful call.
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed call.
    pub last_failure: Option<DateTime<Utc>>,
}

impl ProviderHealth {
    fn observe_latency(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => avg + LATENCY_EMA_ALPHA * (sample - avg),
            None => sample,
        });
    }

    /// Whether the provider has failed too many times in a row.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= DEGRADED_AFTER_FAILURES
    }

    /// Fraction of calls that succeeded, `None` before the first call.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.successful_requests as f64 / self.total_requests as f64)
    }
}

/// Health of every provider that has been called.
#[derive(Debug, Default)]
pub struct HealthTracker {
    providers: DashMap<String, ProviderHealth>,
}

impl HealthTracker {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: &str, latency: Duration) {
        self.record_success_at(provider, latency, Utc::now());
    }

    /// [`record_success`](Self::record_success) at an explicit time.
    pub fn record_success_at(&self, provider: &str, latency: Duration, now: DateTime<Utc>) {
        let mut health = self.providers.entry(provider.to_string()).or_default();
        health.total_requests += 1;
        health.successful_requests += 1;
        health.consecutive_failures = 0;
        health.last_success = Some(now);
        health.observe_latency(latency);
    }

    /// Record a failed or timed-out call.
    pub fn record_failure(&self, provider: &str, latency: Duration) {
        self.record_failure_at(provider, latency, Utc::now());
    }

    /// [`record_failure`](Self::record_failure) at an explicit time.
    pub fn record_failure_at(&self, provider: &str, latency: Duration, now: DateTime<Utc>) {
        let mut health = self.providers.entry(provider.to_string()).or_default();
        health.total_requests += 1;
        health.failed_requests += 1;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_failure = Some(now);
        health.observe_latency(latency);
    }

    /// Health of one provider.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<ProviderHealth> {
        self.providers.get(provider).map(|h| h.clone())
    }

    /// Health of all called providers, sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<(String, ProviderHealth)> {
        let mut out: Vec<_> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_average_is_exponential() {
        let tracker = HealthTracker::new();
        tracker.record_success("alpha", Duration::from_millis(100));
        tracker.record_success("alpha", Duration::from_millis(200));
        let h = tracker.get("alpha").expect("tracked");
        // 100 + 0.2 * (200 - 100)
        assert!((h.avg_latency_ms.expect("avg") - 120.0).abs() < 1e-9);
        assert_eq!(h.success_rate(), Some(1.0));
    }

    #[test]
    fn degraded_after_three_failures_and_recovers() {
        let tracker = HealthTracker::new();
        for _ in 0..2 {
            tracker.record_failure("beta", Duration::from_millis(10));
        }
        assert!(!tracker.get("beta").expect("tracked").is_degraded());
        tracker.record_failure("beta", Duration::from_millis(10));
        assert!(tracker.get("beta").expect("tracked").is_degraded());

        tracker.record_success("beta", Duration::from_millis(10));
        let h = tracker.get("beta").expect("tracked");
        assert!(!h.is_degraded());
        assert_eq!((h.total_requests, h.failed_requests), (4, 3));
        assert!(h.last_failure.is_some() && h.last_success.is_some());
    }

    #[test]
    fn untracked_provider_has_no_health() {
        assert!(HealthTracker::new().get("nobody").is_none());
        assert!(HealthTracker::new().all().is_empty());
    }
}

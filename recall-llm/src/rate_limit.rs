//! Per-provider sliding-window rate limiting.
//!
//! Each provider has a one-minute and a one-hour window of admission
//! timestamps. A check purges timestamps older than each horizon, admits
//! when both windows are below their caps and records the admission.
//! Denials leave the windows untouched.
//!
//! Windows live in a `DashMap` with one `Mutex` per provider, so callers
//! working with different providers never contend.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use recall_core::config::RateLimits;
use tracing::{debug, warn};

/// Admission timestamps of one provider.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    limits: RateLimits,
    minute: VecDeque<DateTime<Utc>>,
    hour: VecDeque<DateTime<Utc>>,
}

fn purge(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, horizon: Duration) {
    while window.front().is_some_and(|&t| now - t >= horizon) {
        window.pop_front();
    }
}

impl RateLimitWindow {
    /// Empty windows with the given caps.
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            minute: VecDeque::new(),
            hour: VecDeque::new(),
        }
    }

    /// Admit and record one request at `now`, or refuse without side effects.
    pub fn check_and_record(&mut self, now: DateTime<Utc>) -> bool {
        purge(&mut self.minute, now, Duration::minutes(1));
        purge(&mut self.hour, now, Duration::hours(1));

        let per_minute = self.limits.per_minute as usize;
        let per_hour = self.limits.per_hour as usize;
        if self.minute.len() < per_minute && self.hour.len() < per_hour {
            self.minute.push_back(now);
            self.hour.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admissions still available at `now` as `(minute, hour)`.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> (u32, u32) {
        let count = |w: &VecDeque<DateTime<Utc>>, horizon: Duration| {
            u32::try_from(w.iter().filter(|&&t| now - t < horizon).count()).unwrap_or(u32::MAX)
        };
        (
            self.limits.per_minute.saturating_sub(count(&self.minute, Duration::minutes(1))),
            self.limits.per_hour.saturating_sub(count(&self.hour, Duration::hours(1))),
        )
    }
}

/// Rate limiter for all providers.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Mutex<RateLimitWindow>>,
}

impl RateLimiter {
    /// An empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a provider's caps. Existing history is
    /// dropped on re-registration.
    pub fn register(&self, provider: &str, limits: RateLimits) {
        self.windows
            .insert(provider.to_string(), Mutex::new(RateLimitWindow::new(limits)));
    }

    /// Whether `provider` has registered caps.
    #[must_use]
    pub fn is_registered(&self, provider: &str) -> bool {
        self.windows.contains_key(provider)
    }

    /// Admit a request for `provider` now.
    pub fn admit(&self, provider: &str) -> bool {
        self.admit_at(provider, Utc::now())
    }

    /// Admit a request for `provider` at `now`. Unknown providers are refused.
    pub fn admit_at(&self, provider: &str, now: DateTime<Utc>) -> bool {
        let Some(window) = self.windows.get(provider) else {
            warn!(provider, "Rate limit check for unregistered provider");
            return false;
        };
        let admitted = window.lock().check_and_record(now);
        if !admitted {
            debug!(provider, "Rate limit reached");
        }
        admitted
    }

    /// Admissions still available for `provider` at `now`.
    #[must_use]
    pub fn remaining_at(&self, provider: &str, now: DateTime<Utc>) -> Option<(u32, u32)> {
        self.windows.get(provider).map(|w| w.lock().remaining(now))
    }
}

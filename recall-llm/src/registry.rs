//! Provider registry: priorities, daily quotas and cost accounting.
//!
//! Providers are registered once at startup. Each has its own usage lock;
//! the registry itself is immutable afterwards, so lookups from concurrent
//! requests only contend when they touch the same provider.
//!
//! Daily counters are keyed by UTC calendar day and reset lazily by
//! [`ProviderRegistry::reset_if_new_day`], which every quota check calls
//! first.
//!
//! A request claims a quota slot with [`ProviderRegistry::reserve`] before
//! calling the provider. The slot counts against the quota while the call is
//! in flight, becomes a usage on [`QuotaReservation::commit`], and is released
//! if the reservation is dropped.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use recall_core::config::ProviderConfig;
use recall_core::error::{RecallError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct DailyUsage {
    day: NaiveDate,
    calls: u32,
    reserved: u32,
    cost_today: f64,
    total_calls: u64,
    total_cost: f64,
}

impl DailyUsage {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            calls: 0,
            reserved: 0,
            cost_today: 0.0,
            total_calls: 0,
            total_cost: 0.0,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.day == today {
            return false;
        }
        self.day = today;
        self.calls = 0;
        self.cost_today = 0.0;
        true
    }

    fn record(&mut self, cost: f64) {
        self.calls = self.calls.saturating_add(1);
        self.total_calls = self.total_calls.saturating_add(1);
        self.cost_today += cost;
        self.total_cost += cost;
    }
}

#[derive(Debug)]
struct ProviderSlot {
    config: ProviderConfig,
    usage: Mutex<DailyUsage>,
}

impl ProviderSlot {
    fn has_capacity(usage: &DailyUsage, quota: u32) -> bool {
        usage.calls.saturating_add(usage.reserved) < quota
    }

    fn effective_cost(&self, reported: Option<f64>) -> f64 {
        match reported {
            Some(cost) if cost.is_finite() && cost >= 0.0 => cost,
            _ => self.config.cost_per_call,
        }
    }
}

/// Usage snapshot of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderUsage {
    /// Provider name.
    pub name: String,
    /// Priority rank.
    pub priority: u32,
    /// Whether the provider may be selected.
    pub enabled: bool,
    /// Daily quota.
    pub daily_quota: u32,
    /// Successful calls counted today.
    pub used_today: u32,
    /// Calls currently in flight.
    pub reserved: u32,
    /// Cost accrued today.
    pub cost_today: f64,
    /// Successful calls since startup.
    pub total_calls: u64,
    /// Cost accrued since startup.
    pub total_cost: f64,
}

/// Registered providers in priority order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    slots: HashMap<String, ProviderSlot>,
    /// Names sorted by priority, registration order breaking ties.
    order: Vec<String>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configs.
    ///
    /// # Errors
    /// The first registration error.
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config.clone())?;
        }
        Ok(registry)
    }

    /// Register a provider.
    ///
    /// # Errors
    /// [`RecallError::Config`] for duplicate or empty names.
    pub fn register(&mut self, config: ProviderConfig) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(RecallError::Config("provider name must not be empty".into()));
        }
        if self.slots.contains_key(&config.name) {
            return Err(RecallError::Config(format!(
                "provider '{}' registered twice",
                config.name
            )));
        }

        info!(
            provider = %config.name,
            priority = config.priority,
            daily_quota = config.daily_quota,
            enabled = config.enabled,
            "Provider registered"
        );

        let name = config.name.clone();
        let priority = config.priority;
        let position = self
            .order
            .iter()
            .position(|n| self.slots.get(n).is_some_and(|s| s.config.priority > priority))
            .unwrap_or(self.order.len());
        self.order.insert(position, name.clone());
        self.slots.insert(name, ProviderSlot {
            config,
            usage: Mutex::new(DailyUsage::new(Utc::now().date_naive())),
        });
        Ok(())
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registered names in priority order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Configuration of a provider.
    #[must_use]
    pub fn config(&self, name: &str) -> Option<&ProviderConfig> {
        self.slots.get(name).map(|s| &s.config)
    }

    /// Zero daily counters if `today` differs from the day they belong to.
    pub fn reset_if_new_day(&self, today: NaiveDate) {
        for (name, slot) in &self.slots {
            if slot.usage.lock().roll_over(today) {
                debug!(provider = %name, %today, "Daily quota reset");
            }
        }
    }

    /// The highest-priority enabled provider with quota left that is not in
    /// `exclude`.
    #[must_use]
    pub fn next_eligible(&self, exclude: &HashSet<String>) -> Option<ProviderConfig> {
        self.next_eligible_on(exclude, Utc::now().date_naive())
    }

    /// [`next_eligible`](Self::next_eligible) for an explicit day.
    #[must_use]
    pub fn next_eligible_on(&self, exclude: &HashSet<String>, today: NaiveDate) -> Option<ProviderConfig> {
        self.reset_if_new_day(today);
        self.order
            .iter()
            .filter(|name| !exclude.contains(*name))
            .filter_map(|name| self.slots.get(name))
            .find(|slot| {
                slot.config.enabled
                    && ProviderSlot::has_capacity(&slot.usage.lock(), slot.config.daily_quota)
            })
            .map(|slot| slot.config.clone())
    }

    /// Count one call and its cost against today's quota.
    ///
    /// `cost` falls back to the provider's `cost_per_call`. Returns `false`
    /// for unknown providers.
    pub fn record_usage(&self, name: &str, cost: Option<f64>) -> bool {
        self.record_usage_on(name, cost, Utc::now().date_naive())
    }

    /// [`record_usage`](Self::record_usage) for an explicit day.
    pub fn record_usage_on(&self, name: &str, cost: Option<f64>, today: NaiveDate) -> bool {
        let Some(slot) = self.slots.get(name) else {
            warn!(provider = name, "Usage recorded for unregistered provider");
            return false;
        };
        let cost = slot.effective_cost(cost);
        let mut usage = slot.usage.lock();
        usage.roll_over(today);
        usage.record(cost);
        true
    }

    /// Claim a quota slot for one call.
    ///
    /// Returns `None` when the provider is unknown, disabled or out of quota.
    pub fn reserve(&self, name: &str) -> Option<QuotaReservation<'_>> {
        self.reserve_on(name, Utc::now().date_naive())
    }

    /// [`reserve`](Self::reserve) for an explicit day.
    pub fn reserve_on(&self, name: &str, today: NaiveDate) -> Option<QuotaReservation<'_>> {
        let slot = self.slots.get(name)?;
        if !slot.config.enabled {
            return None;
        }
        let mut usage = slot.usage.lock();
        usage.roll_over(today);
        if !ProviderSlot::has_capacity(&usage, slot.config.daily_quota) {
            return None;
        }
        usage.reserved += 1;
        Some(QuotaReservation {
            slot,
            today,
            settled: false,
        })
    }

    /// Usage snapshot of one provider.
    #[must_use]
    pub fn usage(&self, name: &str) -> Option<ProviderUsage> {
        self.slots.get(name).map(|slot| {
            let usage = slot.usage.lock();
            ProviderUsage {
                name: slot.config.name.clone(),
                priority: slot.config.priority,
                enabled: slot.config.enabled,
                daily_quota: slot.config.daily_quota,
                used_today: usage.calls,
                reserved: usage.reserved,
                cost_today: usage.cost_today,
                total_calls: usage.total_calls,
                total_cost: usage.total_cost,
            }
        })
    }

    /// Usage snapshots in priority order.
    #[must_use]
    pub fn usage_all(&self) -> Vec<ProviderUsage> {
        self.order.iter().filter_map(|n| self.usage(n)).collect()
    }
}

/// A claimed quota slot. Commit it after a successful call; dropping it
/// releases the slot.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the quota slot"]
pub struct QuotaReservation<'a> {
    slot: &'a ProviderSlot,
    today: NaiveDate,
    settled: bool,
}

impl QuotaReservation<'_> {
    /// Name of the reserved provider.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.slot.config.name
    }

    /// Turn the slot into a counted call, returning the cost charged.
    pub fn commit(mut self, reported_cost: Option<f64>) -> f64 {
        let cost = self.slot.effective_cost(reported_cost);
        {
            let mut usage = self.slot.usage.lock();
            usage.reserved = usage.reserved.saturating_sub(1);
            let day = self.today.max(usage.day);
            usage.roll_over(day);
            usage.record(cost);
        }
        self.settled = true;
        cost
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut usage = self.slot.usage.lock();
            usage.reserved = usage.reserved.saturating_sub(1);
        }
    }
}

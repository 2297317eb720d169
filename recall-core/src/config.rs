//! Configuration for the recall resolution pipeline.
//!
//! Maps directly to `recall.toml`. Every field has a default so partial
//! files are valid; [`RecallConfig::validate`] rejects values that would
//! break the pipeline's invariants.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};
use crate::rewrite::Persona;

/// Upper bound on any configured age/TTL, ten years in seconds.
const MAX_SPAN_SECS: u64 = 315_360_000;

/// Top-level recall configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Memory store matching and maintenance.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Query router behaviour.
    #[serde(default)]
    pub router: RouterConfig,
    /// Fallback cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Persistence backend selection.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// External answer providers, in any order (priority decides).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl RecallConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `RecallError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| RecallError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check every section for out-of-range or inconsistent values.
    ///
    /// # Errors
    /// Returns `RecallError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.router.validate()?;
        self.cache.validate()?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(RecallError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Memory store matching and maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Minimum Jaccard similarity for an entry to be reused.
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f32,
    /// Entries older than this are never reused.
    #[serde(default = "default_30")]
    pub max_memory_age_days: u32,
    /// Step size for feedback-driven effectiveness updates.
    #[serde(default = "default_0_1")]
    pub learning_rate: f32,
    /// Effectiveness assigned to freshly stored entries.
    #[serde(default = "default_0_5")]
    pub initial_effectiveness: f32,
    /// Entries whose effectiveness fell below this are not reused.
    #[serde(default = "default_0_2")]
    pub min_effectiveness: f32,
    /// Size cap enforced by periodic maintenance.
    #[serde(default = "default_10000")]
    pub max_entries: usize,
    /// Run age/size cleanup every N interactions (0 disables).
    #[serde(default = "default_100")]
    pub cleanup_every_n: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            max_memory_age_days: 30,
            learning_rate: 0.1,
            initial_effectiveness: 0.5,
            min_effectiveness: 0.2,
            max_entries: 10_000,
            cleanup_every_n: 100,
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<()> {
        unit_range("memory.similarity_threshold", self.similarity_threshold)?;
        unit_range("memory.initial_effectiveness", self.initial_effectiveness)?;
        unit_range("memory.min_effectiveness", self.min_effectiveness)?;
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(RecallError::Config(format!(
                "memory.learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if u64::from(self.max_memory_age_days) * 86_400 > MAX_SPAN_SECS {
            return Err(RecallError::Config(
                "memory.max_memory_age_days exceeds ten years".into(),
            ));
        }
        Ok(())
    }
}

/// Query router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Try memory on every N-th interaction.
    #[serde(default = "default_3_u64")]
    pub memory_every_n: u64,
    /// Minimum corpus size before memory is consulted at all.
    #[serde(default = "default_5_usize")]
    pub min_memory_entries: usize,
    /// How many recent turns are passed to providers as context.
    #[serde(default = "default_5_usize")]
    pub context_turns: usize,
    /// Attempts per provider before it is excluded for the request.
    #[serde(default = "default_3_u32")]
    pub max_retries: u32,
    /// Base backoff; the delay after attempt `n` is `retry_delay_ms * n`.
    #[serde(default = "default_250")]
    pub retry_delay_ms: u64,
    /// Hard timeout for a single provider call.
    #[serde(default = "default_10000_u64")]
    pub request_timeout_ms: u64,
    /// Persona applied by the response rewriter.
    #[serde(default = "default_persona")]
    pub persona: String,
    /// Fixed rewrite seed. When unset a random base seed is drawn at startup.
    #[serde(default)]
    pub rewrite_seed: Option<u64>,
    /// On a local rate-limit denial, rotate to the next provider instead of
    /// dropping straight to fallback.
    #[serde(default)]
    pub rotate_on_rate_limit: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            memory_every_n: 3,
            min_memory_entries: 5,
            context_turns: 5,
            max_retries: 3,
            retry_delay_ms: 250,
            request_timeout_ms: 10_000,
            persona: default_persona(),
            rewrite_seed: None,
            rotate_on_rate_limit: false,
        }
    }
}

impl RouterConfig {
    /// Backoff unit between retries.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-call provider timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse the configured persona name.
    ///
    /// # Errors
    /// Returns `RecallError::Config` for unknown persona names.
    pub fn persona(&self) -> Result<Persona> {
        Persona::from_str(&self.persona)
    }

    fn validate(&self) -> Result<()> {
        if self.memory_every_n == 0 {
            return Err(RecallError::Config("router.memory_every_n must be >= 1".into()));
        }
        if self.max_retries == 0 {
            return Err(RecallError::Config("router.max_retries must be >= 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(RecallError::Config(
                "router.request_timeout_ms must be > 0".into(),
            ));
        }
        self.persona().map(|_| ())
    }
}

/// Fallback cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached answers. Zero makes the cache unusable.
    #[serde(default = "default_256")]
    pub capacity: usize,
    /// Time-to-live for cached answers, in seconds.
    #[serde(default = "default_86400")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 86_400,
        }
    }
}

impl CacheConfig {
    /// TTL as a chrono duration.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_secs.min(MAX_SPAN_SECS)).unwrap_or(0))
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 || self.ttl_secs > MAX_SPAN_SECS {
            return Err(RecallError::Config(format!(
                "cache.ttl_secs must be in 1..={MAX_SPAN_SECS}, got {}",
                self.ttl_secs
            )));
        }
        Ok(())
    }
}

/// Persistence / storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "memory" or "sqlite".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database path for the SQLite backend.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Store and verify a checksum per row.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            wal_mode: true,
            checksum_enabled: true,
        }
    }
}

/// Configuration of one external answer provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name.
    pub name: String,
    /// Lower ranks are tried first.
    #[serde(default)]
    pub priority: u32,
    /// Maximum successful calls per calendar day (UTC).
    #[serde(default = "default_1000")]
    pub daily_quota: u32,
    /// Cost charged per call when the provider does not report one.
    #[serde(default)]
    pub cost_per_call: f64,
    /// Disabled providers are registered but never selected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Confidence attached to this provider's answers.
    #[serde(default = "default_0_85")]
    pub base_confidence: f32,
    /// Sliding-window admission caps.
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// Connection details, opaque to the core.
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

impl ProviderConfig {
    /// Minimal config for a named provider with default limits.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            daily_quota: default_1000(),
            cost_per_call: 0.0,
            enabled: true,
            base_confidence: default_0_85(),
            rate_limits: RateLimits::default(),
            endpoint: EndpointConfig::default(),
        }
    }

    /// Set the priority rank.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the daily quota.
    #[must_use]
    pub fn with_daily_quota(mut self, quota: u32) -> Self {
        self.daily_quota = quota;
        self
    }

    /// Set the per-call cost.
    #[must_use]
    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Set the rate limits.
    #[must_use]
    pub fn with_rate_limits(mut self, per_minute: u32, per_hour: u32) -> Self {
        self.rate_limits = RateLimits {
            per_minute,
            per_hour,
        };
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RecallError::Config("provider name must not be empty".into()));
        }
        unit_range(&format!("providers.{}.base_confidence", self.name), self.base_confidence)?;
        if !self.cost_per_call.is_finite() || self.cost_per_call < 0.0 {
            return Err(RecallError::Config(format!(
                "providers.{}.cost_per_call must be a non-negative number",
                self.name
            )));
        }
        Ok(())
    }
}

/// Per-provider sliding-window admission caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Max admissions in any 60-second window.
    #[serde(default = "default_60")]
    pub per_minute: u32,
    /// Max admissions in any 3600-second window.
    #[serde(default = "default_1000")]
    pub per_hour: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
        }
    }
}

/// How to reach a provider. Interpreted only by provider adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Adapter kind: "ollama", "openai" or "custom".
    #[serde(default)]
    pub kind: String,
    /// Base URL of the API.
    #[serde(default)]
    pub base_url: String,
    /// Model name to request.
    #[serde(default)]
    pub model: String,
    /// Environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn unit_range(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RecallError::Config(format!(
            "{field} must be in [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_persona() -> String { "neutral".to_string() }
fn default_backend() -> String { "memory".to_string() }
fn default_db_path() -> String { "recall.db".to_string() }
fn default_0_1() -> f32 { 0.1 }
fn default_0_2() -> f32 { 0.2 }
fn default_0_5() -> f32 { 0.5 }
fn default_0_85() -> f32 { 0.85 }
fn default_similarity() -> f32 { 0.6 }
fn default_3_u32() -> u32 { 3 }
fn default_3_u64() -> u64 { 3 }
fn default_5_usize() -> usize { 5 }
fn default_30() -> u32 { 30 }
fn default_60() -> u32 { 60 }
fn default_100() -> u64 { 100 }
fn default_250() -> u64 { 250 }
fn default_256() -> usize { 256 }
fn default_1000() -> u32 { 1000 }
fn default_10000() -> usize { 10_000 }
fn default_10000_u64() -> u64 { 10_000 }
fn default_86400() -> u64 { 86_400 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = RecallConfig::from_toml("").expect("parse");
        assert!((config.memory.similarity_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.memory.max_memory_age_days, 30);
        assert_eq!(config.router.memory_every_n, 3);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert!(config.providers.is_empty());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn providers_parse_with_partial_fields() {
        let config = RecallConfig::from_toml(
            r#"
            [router]
            memory_every_n = 4
            persona = "playful"

            [[providers]]
            name = "alpha"
            priority = 1
            daily_quota = 50
            cost_per_call = 0.002
            rate_limits = { per_minute = 5, per_hour = 100 }
            endpoint = { kind = "ollama", base_url = "http://localhost:11434", model = "qwen2.5:1.5b" }

            [[providers]]
            name = "beta"
            "#,
        )
        .expect("parse");

        assert_eq!(config.router.memory_every_n, 4);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].rate_limits.per_minute, 5);
        assert_eq!(config.providers[0].endpoint.kind, "ollama");
        assert_eq!(config.providers[1].daily_quota, 1000);
        assert!(config.providers[1].enabled);
        config.validate().expect("valid");
    }

    #[test]
    fn duplicate_provider_names_rejected() {
        let mut config = RecallConfig::default();
        config.providers.push(ProviderConfig::named("alpha"));
        config.providers.push(ProviderConfig::named("alpha"));
        assert!(matches!(config.validate(), Err(RecallError::Config(_))));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = RecallConfig::default();
        config.memory.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_gate_interval_rejected() {
        let mut config = RecallConfig::default();
        config.router.memory_every_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_persona_rejected() {
        let mut config = RecallConfig::default();
        config.router.persona = "pirate-king".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = RecallConfig::from_toml("[router\nmemory_every_n = ").expect_err("invalid");
        assert!(matches!(err, RecallError::Config(_)));
    }
}

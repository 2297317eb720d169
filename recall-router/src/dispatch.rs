//! Provider dispatch: rotation, rate limiting, retries and timeouts.
//!
//! ```text
//! loop (at most registry.len() providers):
//!     next_eligible(exclude)      None         → give up (fallback)
//!     rate_limiter.admit(name)    refused      → give up, or rotate if configured
//!     attempt 1..=max_retries:
//!         reserve quota           none left    → exclude provider
//!         timeout(call)           ok           → commit, return answer
//!                                 error        → release; retry if transient,
//!                                                after sleeping retry_delay * attempt
//!     exclude provider
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use recall_core::config::ProviderConfig;
use recall_core::conversation::ContextTurn;
use recall_core::types::clamp_unit;
use recall_llm::{AnswerProvider, ProviderError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::services::RouterServices;

/// A successful provider answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAnswer {
    /// Provider that answered.
    pub provider: String,
    /// Raw answer text.
    pub text: String,
    /// Cost charged for the call.
    pub cost: f64,
    /// The provider's configured confidence.
    pub confidence: f32,
    /// Attempts spent on the answering provider.
    pub attempts: u32,
}

/// Try providers in priority order until one answers.
///
/// Returns `None` when every eligible provider is exhausted, refused by the
/// rate limiter, or failed all its attempts.
pub async fn dispatch(
    services: &RouterServices,
    query: &str,
    context: &[ContextTurn],
) -> Option<ProviderAnswer> {
    let mut exclude: HashSet<String> = HashSet::new();

    for _ in 0..services.registry.len() {
        let config = services.registry.next_eligible(&exclude)?;

        if !services.rate_limiter.admit(&config.name) {
            services.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            if services.config.router.rotate_on_rate_limit {
                debug!(provider = %config.name, "Rate limited, rotating");
                exclude.insert(config.name);
                continue;
            }
            info!(provider = %config.name, "Rate limited, falling back");
            return None;
        }

        let Some(adapter) = services.providers.get(&config.name) else {
            warn!(provider = %config.name, "No adapter registered, skipping");
            exclude.insert(config.name);
            continue;
        };

        if let Some(answer) = call_with_retries(services, &config, adapter, query, context).await {
            return Some(answer);
        }
        exclude.insert(config.name);
    }
    None
}

async fn call_with_retries(
    services: &RouterServices,
    config: &ProviderConfig,
    adapter: Arc<dyn AnswerProvider>,
    query: &str,
    context: &[ContextTurn],
) -> Option<ProviderAnswer> {
    let router = &services.config.router;
    let timeout = router.request_timeout();

    for attempt in 1..=router.max_retries {
        let Some(reservation) = services.registry.reserve(&config.name) else {
            debug!(provider = %config.name, "Quota exhausted mid-request");
            return None;
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, adapter.call(query, context, timeout)).await;
        let elapsed = start.elapsed();

        let error = match outcome {
            Ok(Ok(reply)) if !reply.text.trim().is_empty() => {
                let cost = reservation.commit(reply.cost);
                services.health.record_success(&config.name, elapsed);
                services.counters.add_cost(cost);
                debug!(
                    provider = %config.name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    cost,
                    "Provider answered"
                );
                return Some(ProviderAnswer {
                    provider: config.name.clone(),
                    text: reply.text,
                    cost,
                    confidence: clamp_unit(config.base_confidence),
                    attempts: attempt,
                });
            }
            Ok(Ok(_)) => ProviderError::Parse("empty answer".into()),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        };
        drop(reservation);

        services.health.record_failure(&config.name, elapsed);
        services.counters.provider_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %config.name,
            attempt,
            max_attempts = router.max_retries,
            transient = error.is_transient(),
            error = %error,
            "Provider attempt failed"
        );

        if !error.is_transient() {
            break;
        }
        if attempt < router.max_retries {
            tokio::time::sleep(router.retry_delay() * attempt).await;
        }
    }
    None
}

//! # recall-llm: Provider Layer for Recall
//!
//! Everything between the router and the outside world:
//!   - **Capability trait** ([`AnswerProvider`]) that every provider adapter
//!     implements
//!   - **HTTP adapters** for Ollama and OpenAI-compatible APIs
//!   - **Rate limiter** with per-provider minute/hour sliding windows
//!   - **Provider registry** with priorities, daily quotas and cost
//!   - **Health tracking** per provider
//!
//! # Selection
//!
//! ```text
//! registry.next_eligible(exclude)  → highest priority with quota left
//! rate_limiter.admit(name)         → minute/hour windows both open
//! registry.reserve(name)           → quota slot held while in flight
//! provider.call(query, context)    → commit on success, release on failure
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod health;
pub mod prompt;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod types;

pub use client::{OllamaProvider, OpenAiCompatibleProvider, ProviderSet};
pub use error::ProviderError;
pub use health::{HealthTracker, ProviderHealth};
pub use provider::AnswerProvider;
pub use rate_limit::RateLimiter;
pub use registry::{ProviderRegistry, ProviderUsage, QuotaReservation};
pub use types::ProviderReply;

//! # recall-router: Query Resolution for Recall
//!
//! Turns a query into an answer by trying, in order:
//!   1. **Memory** on every `memory_every_n`-th interaction once the corpus
//!      holds `min_memory_entries`
//!   2. **Providers** by priority, within rate limits and daily quotas, with
//!      per-call timeouts and linear backoff between retries
//!   3. **Fallback**: cached answers, then canned or generic local text
//!
//! The chosen text is rewritten for the configured persona, stored back into
//! memory and appended to the session's conversation log.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use recall_core::RecallConfig;
//! use recall_llm::ProviderSet;
//! use recall_router::{QueryRouter, RouterServices};
//!
//! let config = RecallConfig::from_file(std::path::Path::new("recall.toml"))?;
//! let providers = ProviderSet::from_configs(&config.providers)?;
//! let services = RouterServices::build(config, providers)?;
//! let mut router = QueryRouter::new(services);
//! let answer = router.resolve("what is the metaverse").await;
//! println!("{} ({})", answer.text, answer.source);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod feedback;
pub mod report;
pub mod router;
pub mod services;
pub mod telemetry;

pub use dispatch::ProviderAnswer;
pub use report::{MetricsReport, ProviderReport};
pub use router::{QueryRouter, Resolution};
pub use services::RouterServices;
pub use telemetry::init_tracing;

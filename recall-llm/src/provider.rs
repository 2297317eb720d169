//! The provider capability interface.
//!
//! The router never speaks a wire protocol itself. Anything that can turn a
//! query plus a short conversation history into text implements
//! [`AnswerProvider`]; HTTP adapters live in [`crate::client`].

use std::time::Duration;

use async_trait::async_trait;
use recall_core::conversation::ContextTurn;

use crate::error::ProviderError;
use crate::types::ProviderReply;

/// An external source of answers.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    /// Name matching the provider's `[[providers]]` entry.
    fn name(&self) -> &str;

    /// Answer `query` given the most recent turns, oldest first.
    ///
    /// `timeout` is advisory for adapters that can pass it on; the router
    /// enforces it independently.
    async fn call(
        &self,
        query: &str,
        context: &[ContextTurn],
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError>;
}

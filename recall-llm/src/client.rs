//! HTTP provider adapters for Ollama and OpenAI-compatible APIs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use recall_core::config::{EndpointConfig, ProviderConfig};
use recall_core::conversation::ContextTurn;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::prompt;
use crate::provider::AnswerProvider;
use crate::types::ProviderReply;

const MAX_ERROR_BODY_CHARS: usize = 200;

fn map_send_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    } else {
        ProviderError::from(err)
    }
}

async fn error_for_status(resp: Response) -> ProviderError {
    let status = resp.status();
    let body: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::Throttled(body)
    } else {
        ProviderError::HttpStatus {
            status: status.as_u16(),
            body,
        }
    }
}

fn non_empty(text: Option<&str>, what: &str) -> Result<String, ProviderError> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::Parse(format!("missing or empty {what}"))),
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Ollama `/api/generate` adapter.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
    http: Client,
}

impl OllamaProvider {
    /// Create an adapter for the given endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl AnswerProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        query: &str,
        context: &[ContextTurn],
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": prompt::render_prompt(query, context),
            "stream": false,
        });

        let start = Instant::now();
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        if !resp.status().is_success() {
            let err = error_for_status(resp).await;
            warn!(provider = %self.name, error = %err, "Ollama returned error");
            return Err(err);
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let text = non_empty(json["response"].as_str(), "response")?;

        debug!(
            provider = %self.name,
            model = %self.model,
            latency_ms = start.elapsed().as_millis(),
            "Ollama answered"
        );
        Ok(ProviderReply::new(text))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// `/v1/chat/completions` adapter for OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    http: Client,
}

impl OpenAiCompatibleProvider {
    /// Create an adapter. `api_key` is sent as a bearer token when present.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl AnswerProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        query: &str,
        context: &[ContextTurn],
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": prompt::build_messages(query, context),
        });

        let start = Instant::now();
        let mut request = self.http.post(&url).json(&body).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.map_err(|e| map_send_error(e, timeout))?;

        if !resp.status().is_success() {
            let err = error_for_status(resp).await;
            warn!(provider = %self.name, error = %err, "OpenAI-compatible API returned error");
            return Err(err);
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let text = non_empty(json["choices"][0]["message"]["content"].as_str(), "message content")?;

        debug!(
            provider = %self.name,
            model = %self.model,
            latency_ms = start.elapsed().as_millis(),
            completion_tokens = json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            "OpenAI-compatible API answered"
        );
        Ok(ProviderReply::new(text))
    }
}

// ---------------------------------------------------------------------------
// ProviderSet
// ---------------------------------------------------------------------------

/// Adapters by provider name.
#[derive(Default, Clone)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn AnswerProvider>>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("ProviderSet").field("providers", &names).finish()
    }
}

impl ProviderSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP adapters for every config whose endpoint kind is
    /// `ollama` or `openai`. Kinds `custom` and empty are left for the
    /// caller to [`insert`](Self::insert).
    ///
    /// # Errors
    /// [`ProviderError::Config`] for unknown kinds, missing URLs or models,
    /// or an API key variable that is not set.
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self, ProviderError> {
        let mut set = Self::new();
        for config in configs {
            if let Some(adapter) = build_adapter(&config.name, &config.endpoint)? {
                set.insert(adapter);
            }
        }
        Ok(set)
    }

    /// Add or replace an adapter, returning the one it replaced.
    pub fn insert(&mut self, provider: Arc<dyn AnswerProvider>) -> Option<Arc<dyn AnswerProvider>> {
        self.providers.insert(provider.name().to_string(), provider)
    }

    /// Look up an adapter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AnswerProvider>> {
        self.providers.get(name).cloned()
    }

    /// Whether an adapter is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Number of adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn build_adapter(
    name: &str,
    endpoint: &EndpointConfig,
) -> Result<Option<Arc<dyn AnswerProvider>>, ProviderError> {
    let require = |field: &str, value: &str| {
        if value.trim().is_empty() {
            Err(ProviderError::Config(format!("provider '{name}' needs endpoint.{field}")))
        } else {
            Ok(())
        }
    };

    match endpoint.kind.as_str() {
        "" | "custom" => Ok(None),
        "ollama" => {
            require("base_url", &endpoint.base_url)?;
            require("model", &endpoint.model)?;
            Ok(Some(Arc::new(OllamaProvider::new(name, &endpoint.base_url, &endpoint.model))))
        }
        "openai" => {
            require("base_url", &endpoint.base_url)?;
            require("model", &endpoint.model)?;
            let api_key = match &endpoint.api_key_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    ProviderError::Config(format!(
                        "provider '{name}': environment variable {var} is not set"
                    ))
                })?),
                None => None,
            };
            Ok(Some(Arc::new(OpenAiCompatibleProvider::new(
                name,
                &endpoint.base_url,
                &endpoint.model,
                api_key,
            ))))
        }
        other => Err(ProviderError::Config(format!(
            "provider '{name}': unknown endpoint kind '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, kind: &str) -> ProviderConfig {
        let mut c = ProviderConfig::named(name);
        c.endpoint = EndpointConfig {
            kind: kind.into(),
            base_url: "http://127.0.0.1:1/".into(),
            model: "tiny".into(),
            api_key_env: None,
        };
        c
    }

    #[test]
    fn builds_http_adapters_and_skips_custom() {
        let set = ProviderSet::from_configs(&[
            config("local", "ollama"),
            config("cloud", "openai"),
            config("scripted", "custom"),
        ])
        .expect("build");
        assert_eq!(set.len(), 2);
        assert!(set.contains("local"));
        assert!(set.contains("cloud"));
        assert!(!set.contains("scripted"));
        assert_eq!(set.get("local").expect("adapter").name(), "local");
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = ProviderSet::from_configs(&[config("x", "carrier-pigeon")]).expect_err("bad kind");
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn missing_model_is_config_error() {
        let mut c = config("x", "ollama");
        c.endpoint.model = String::new();
        assert!(ProviderSet::from_configs(&[c]).is_err());
    }

    #[test]
    fn missing_api_key_variable_is_config_error() {
        let mut c = config("x", "openai");
        c.endpoint.api_key_env = Some("RECALL_TEST_KEY_THAT_IS_NEVER_SET".into());
        assert!(matches!(ProviderSet::from_configs(&[c]), Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let provider = OllamaProvider::new("local", "http://127.0.0.1:1", "tiny");
        let err = provider
            .call("hello", &[], Duration::from_secs(2))
            .await
            .expect_err("nothing listens on port 1");
        assert!(err.is_transient(), "{err}");
    }
}

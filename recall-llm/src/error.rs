//! Provider error types.

use thiserror::Error;

/// Errors a provider call can fail with.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request could not be sent or the connection dropped.
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    /// The provider answered with a non-success status.
    #[error("Provider returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The call did not finish within its deadline.
    #[error("Provider call timed out after {0}ms")]
    Timeout(u64),

    /// The provider refused the call because of its own rate limiting.
    #[error("Provider throttled the request: {0}")]
    Throttled(String),

    /// The provider is unreachable.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The response could not be understood.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// The provider is misconfigured.
    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same provider may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) | Self::Throttled(_) | Self::Unavailable(_) => {
                true
            }
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(0)
        } else if err.is_connect() {
            ProviderError::Unavailable(err.to_string())
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout(100).is_transient());
        assert!(ProviderError::Throttled("slow down".into()).is_transient());
        assert!(ProviderError::HttpStatus { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::HttpStatus { status: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::HttpStatus { status: 401, body: String::new() }.is_transient());
        assert!(!ProviderError::Parse("bad json".into()).is_transient());
        assert!(!ProviderError::Config("no key".into()).is_transient());
    }
}

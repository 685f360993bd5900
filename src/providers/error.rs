use std::time::Duration;
use thiserror::Error;

/// Provider-specific errors
///
/// Adapters raise these; the conversation handler passes them through unchanged.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Credential '{0}' is missing or empty")]
    AuthConfig(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider responded with HTTP status {status}")]
    Http { status: u16 },

    #[error("Unexpected response format: {raw_body}")]
    ResponseFormat { raw_body: String },

    #[error("Malformed stream event: {0}")]
    StreamDecode(String),

    /// Carries no URL: query-authenticated endpoints hold the API key
    #[error("HTTP transport failed: {0}")]
    Transport(reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.without_url())
    }
}

impl ProviderError {
    /// Check if this is a client error (4xx) that will fail again unchanged
    pub fn is_client_error(&self) -> bool {
        match self {
            ProviderError::Http { status } => *status >= 400 && *status < 500,
            _ => false,
        }
    }

    /// Whether a caller-level retry policy may reasonably try again.
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            _ => false,
        }
    }
}

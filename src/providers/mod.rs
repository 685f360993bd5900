pub mod anthropic;
pub mod base;
pub mod cohere;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod registry;
pub mod streaming;

use crate::models::{Message, RequestConfig};
use async_trait::async_trait;
use error::ProviderError;
use std::fmt;
use std::str::FromStr;
use streaming::FragmentStream;

/// Main adapter trait - one implementation per wire protocol
///
/// Adapters take canonical history and absorb every provider divergence:
/// role vocabulary, content nesting, answer location, stream framing and
/// auth placement. They hold no conversation state and never retry.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Model and sampling settings fixed at construction
    fn config(&self) -> &RequestConfig;

    /// Single-shot request returning the full answer text
    async fn complete_chat(&self, history: &[Message]) -> Result<String, ProviderError>;

    /// Streaming request returning normalized text deltas in arrival order
    async fn stream_chat(&self, history: &[Message]) -> Result<FragmentStream, ProviderError>;
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Mistral,
    Together,
    Cohere,
    Google,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Mistral,
        ProviderKind::Together,
        ProviderKind::Cohere,
        ProviderKind::Google,
        ProviderKind::Anthropic,
    ];

    /// Stable identifier used in configuration
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Together => "together",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Google => "google",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    /// Name of the secret holding this provider's API key
    pub fn credential_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Mistral => "MISTRAL_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
            ProviderKind::Cohere => "COHERE_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Together => "https://api.together.xyz/v1",
            ProviderKind::Cohere => "https://api.cohere.ai/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProviderError::UnknownProvider(s.to_string()))
    }
}

// Re-export provider implementations
pub use anthropic::AnthropicProvider;
pub use cohere::CohereProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAICompatibleProvider;
pub use registry::{ProviderEntry, ProviderRegistry};
pub use streaming::StreamDecoder;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical conversation role
///
/// Providers spell roles differently on the wire ("assistant", "Chatbot", "model").
/// Adapters translate at the request boundary; everything above them uses this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-handler request settings, fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    pub model_name: String,
    pub temperature: f32,
    /// Output token cap for providers that require or accept one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl RequestConfig {
    pub fn new(model_name: impl Into<String>, temperature: f32) -> Self {
        Self {
            model_name: model_name.into(),
            temperature,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What a decoded stream event means to the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// A piece of assistant text
    Delta,
    /// Heartbeats, block markers, metadata
    Ignorable,
    /// In-band end-of-stream marker
    Terminal,
}

/// Normalized unit produced by a stream decoder, whatever the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub kind: FragmentKind,
    pub text: Option<String>,
}

impl StreamFragment {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Delta,
            text: Some(text.into()),
        }
    }

    pub fn ignorable() -> Self {
        Self {
            kind: FragmentKind::Ignorable,
            text: None,
        }
    }

    pub fn terminal() -> Self {
        Self {
            kind: FragmentKind::Terminal,
            text: None,
        }
    }

    /// Delta for non-empty text, otherwise ignorable.
    /// Role-only chunks and empty block starts carry "" and must not surface.
    pub fn from_text(text: Option<&str>) -> Self {
        match text {
            Some(text) if !text.is_empty() => Self::delta(text),
            _ => Self::ignorable(),
        }
    }
}

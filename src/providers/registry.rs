use super::base::resolve_credential;
use super::{
    error::ProviderError, AnthropicProvider, ChatProvider, CohereProvider, GeminiProvider,
    OpenAICompatibleProvider, ProviderKind,
};
use crate::auth::CredentialSource;
use crate::config::AppConfig;
use crate::conversation::ConversationHandler;
use crate::models::RequestConfig;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A selectable chat target: display name, wire protocol and model
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
        }
    }
}

/// Built-in entries, in display order
pub fn default_entries() -> Vec<ProviderEntry> {
    use ProviderKind::*;

    [
        ("GPT-4 Turbo", OpenAi, "gpt-4-turbo-preview"),
        ("GPT-3.5 Turbo", OpenAi, "gpt-3.5-turbo"),
        ("Mistral Large", Mistral, "mistral-large-latest"),
        ("Mixtral-8X7B", Mistral, "mistral-small"),
        ("Mistral-7B", Mistral, "mistral-tiny"),
        ("Llama 3 70B", Together, "meta-llama/Llama-3-70b-chat-hf"),
        ("Cohere Chat", Cohere, "command-r-plus"),
        ("Gemini 1.5 Pro", Google, "gemini-1.5-pro-latest"),
        ("Claude 3 Opus", Anthropic, "claude-3-opus-20240229"),
        ("Claude 3 Sonnet", Anthropic, "claude-3-sonnet-20240229"),
    ]
    .into_iter()
    .map(|(name, kind, model)| ProviderEntry::new(name, kind, model))
    .collect()
}

/// Provider registry: maps display names to adapters and builds handlers
pub struct ProviderRegistry {
    /// Ordered entries shown to the user
    entries: Vec<ProviderEntry>,
    credentials: Arc<dyn CredentialSource>,
    /// Base URL overrides by provider
    endpoints: HashMap<ProviderKind, String>,
    /// Shared connection pool for every adapter
    http: Client,
    request_timeout: Option<Duration>,
    max_tokens: Option<u32>,
}

impl ProviderRegistry {
    /// Registry over the built-in entries with default endpoints
    pub fn new(credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            entries: default_entries(),
            credentials,
            endpoints: HashMap::new(),
            http: Client::new(),
            request_timeout: None,
            max_tokens: None,
        }
    }

    /// Registry configured from `AppConfig` (timeouts, token cap and endpoint overrides)
    pub fn from_config(
        config: &AppConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        let mut registry = Self::new(credentials);
        registry.http = http;
        registry.request_timeout = config.request_timeout();
        registry.max_tokens = config.max_tokens;

        for (id, base_url) in &config.endpoints {
            let kind: ProviderKind = id.parse()?;
            tracing::debug!("Using {} for {}", base_url, kind);
            registry.endpoints.insert(kind, base_url.clone());
        }

        Ok(registry)
    }

    /// Override the base URL of one provider
    pub fn with_endpoint(mut self, kind: ProviderKind, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(kind, base_url.into());
        self
    }

    /// Add an entry, replacing any existing entry of the same name in place
    pub fn register(&mut self, entry: ProviderEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Display names in registry order
    pub fn list_providers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Look up an entry by display name (case-insensitive)
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name)))
    }

    /// Build a fresh conversation for the named entry
    pub fn select_provider(
        &self,
        name: &str,
        temperature: f32,
    ) -> Result<ConversationHandler, ProviderError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;

        let mut config = RequestConfig::new(&entry.model, temperature);
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }

        let provider = self.build_provider(entry.kind, config)?;
        tracing::info!("Selected {} ({} / {})", entry.name, entry.kind, entry.model);

        Ok(ConversationHandler::new(entry.name.clone(), provider).with_timeout(self.request_timeout))
    }

    /// Construct the adapter for `kind`; fails with `AuthConfig` before any network call
    pub fn build_provider(
        &self,
        kind: ProviderKind,
        config: RequestConfig,
    ) -> Result<Box<dyn ChatProvider>, ProviderError> {
        let credential = resolve_credential(self.credentials.as_ref(), kind.credential_name())?;
        let base_url = self
            .endpoints
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_base_url().to_string());
        let http = self.http.clone();

        let provider: Box<dyn ChatProvider> = match kind {
            ProviderKind::OpenAi | ProviderKind::Mistral | ProviderKind::Together => Box::new(
                OpenAICompatibleProvider::new(kind, credential, base_url, config, http),
            ),
            ProviderKind::Cohere => Box::new(CohereProvider::new(credential, base_url, config, http)),
            ProviderKind::Google => Box::new(GeminiProvider::new(credential, base_url, config, http)),
            ProviderKind::Anthropic => {
                Box::new(AnthropicProvider::new(credential, base_url, config, http))
            }
        };

        Ok(provider)
    }
}

use super::base::{AuthPlacement, BaseClient, ACCEPT_EVENT_STREAM};
use super::streaming::{self, FragmentStream, SseEvent, StreamDecoder};
use super::{error::ProviderError, ChatProvider, ProviderKind};
use crate::auth::Credential;
use crate::models::{Message, RequestConfig, StreamFragment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANSWER_POINTER: &str = "/content/0/text";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Decoder for Anthropic's typed SSE events
///
/// Text arrives in `content_block_delta`; `message_stop` terminates.
/// `ping`, `message_start`, `content_block_start`, `content_block_stop`
/// and `message_delta` are control events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicDecoder;

impl StreamDecoder for AnthropicDecoder {
    fn decode(&self, event: &SseEvent) -> Result<StreamFragment, ProviderError> {
        let payload = streaming::parse_event_json(event)?;

        // The data's own "type" is authoritative; the SSE event name mirrors it
        let event_type = payload
            .get("type")
            .and_then(|v| v.as_str())
            .or(event.event.as_deref())
            .unwrap_or_default();

        match event_type {
            "content_block_delta" => Ok(StreamFragment::from_text(
                payload.pointer("/delta/text").and_then(|v| v.as_str()),
            )),
            "message_stop" => Ok(StreamFragment::terminal()),
            "error" => {
                let message = payload
                    .pointer("/error/message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown stream error");
                Err(ProviderError::StreamDecode(message.to_string()))
            }
            _ => Ok(StreamFragment::ignorable()),
        }
    }
}

/// Adapter for the Anthropic Messages API
pub struct AnthropicProvider {
    base: BaseClient,
}

impl AnthropicProvider {
    pub fn new(
        credential: Credential,
        base_url: impl Into<String>,
        config: RequestConfig,
        http: Client,
    ) -> Self {
        let base = BaseClient::new(credential, AuthPlacement::Header("x-api-key"), base_url, config, http)
            .with_header("anthropic-version", ANTHROPIC_VERSION);
        Self { base }
    }

    fn build_request<'a>(&'a self, history: &'a [Message], stream: bool) -> AnthropicRequest<'a> {
        let config = self.base.config();
        AnthropicRequest {
            model: &config.model_name,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: history
                .iter()
                .map(|msg| AnthropicMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                })
                .collect(),
            temperature: config.temperature,
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn config(&self) -> &RequestConfig {
        self.base.config()
    }

    async fn complete_chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let url = self.base.endpoint("/v1/messages", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, false))?;

        self.base.complete(url, body, ANSWER_POINTER).await
    }

    async fn stream_chat(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let url = self.base.endpoint("/v1/messages", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, true))?;

        let response = self.base.send(url, body, ACCEPT_EVENT_STREAM).await?;
        Ok(streaming::normalize(
            streaming::sse_events(response),
            AnthropicDecoder,
        ))
    }
}

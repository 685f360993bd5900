use super::base::{AuthPlacement, BaseClient, ACCEPT_EVENT_STREAM};
use super::streaming::{self, FragmentStream, SseEvent, StreamDecoder};
use super::{error::ProviderError, ChatProvider, ProviderKind};
use crate::auth::Credential;
use crate::models::{Message, RequestConfig, StreamFragment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const ANSWER_POINTER: &str = "/choices/0/message/content";
const DELTA_POINTER: &str = "/choices/0/delta/content";

/// OpenAI Chat Completions request format
#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Decoder for chat-completions SSE: `choices[0].delta.content`, ended by `[DONE]`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatCompletionsDecoder;

impl StreamDecoder for ChatCompletionsDecoder {
    fn decode(&self, event: &SseEvent) -> Result<StreamFragment, ProviderError> {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Ok(StreamFragment::terminal());
        }

        let chunk = streaming::parse_event_json(event)?;
        if let Some(error) = chunk.get("error") {
            return Err(ProviderError::StreamDecode(error.to_string()));
        }

        // Role-only first chunks and usage-only trailing chunks carry no text
        Ok(StreamFragment::from_text(
            chunk.pointer(DELTA_POINTER).and_then(|v| v.as_str()),
        ))
    }
}

/// Adapter for OpenAI-compatible chat completions
/// Works with: OpenAI, Mistral, Together
pub struct OpenAICompatibleProvider {
    kind: ProviderKind,
    base: BaseClient,
}

impl OpenAICompatibleProvider {
    pub fn new(
        kind: ProviderKind,
        credential: Credential,
        base_url: impl Into<String>,
        config: RequestConfig,
        http: Client,
    ) -> Self {
        Self {
            kind,
            base: BaseClient::new(credential, AuthPlacement::Bearer, base_url, config, http),
        }
    }

    fn build_request<'a>(&'a self, history: &'a [Message], stream: bool) -> OpenAIRequest<'a> {
        let config = self.base.config();
        OpenAIRequest {
            model: &config.model_name,
            messages: history
                .iter()
                .map(|msg| OpenAIMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAICompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn config(&self) -> &RequestConfig {
        self.base.config()
    }

    async fn complete_chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let url = self.base.endpoint("/chat/completions", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, false))?;

        self.base.complete(url, body, ANSWER_POINTER).await
    }

    async fn stream_chat(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let url = self.base.endpoint("/chat/completions", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, true))?;

        let response = self.base.send(url, body, ACCEPT_EVENT_STREAM).await?;
        Ok(streaming::normalize(
            streaming::sse_events(response),
            ChatCompletionsDecoder,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::providers::base::resolve_credential;
    use crate::providers::streaming::{normalize, RawEventStream};
    use futures::stream::{self, TryStreamExt};
    use serde_json::json;

    fn provider() -> OpenAICompatibleProvider {
        let credentials = StaticCredentials::new().with("OPENAI_API_KEY", "sk-test");
        OpenAICompatibleProvider::new(
            ProviderKind::OpenAi,
            resolve_credential(&credentials, "OPENAI_API_KEY").unwrap(),
            ProviderKind::OpenAi.default_base_url(),
            RequestConfig::new("gpt-3.5-turbo", 0.7),
            Client::new(),
        )
    }

    #[test]
    fn test_request_uses_flat_user_assistant_messages() {
        let provider = provider();
        let history = vec![Message::user("hi"), Message::assistant("hello"), Message::user("bye")];
        let body = serde_json::to_value(provider.build_request(&history, false)).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "bye"}
                ],
                "temperature": 0.7f32
            })
        );

        let streaming = serde_json::to_value(provider.build_request(&history, true)).unwrap();
        assert_eq!(streaming["stream"], true);
    }

    #[tokio::test]
    async fn test_decoder_filters_role_chunk_and_stops_at_done() {
        let events: RawEventStream = Box::pin(stream::iter(
            vec![
                r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
                r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
                r#"{"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#,
                "[DONE]",
            ]
            .into_iter()
            .map(|data| Ok::<_, ProviderError>(SseEvent::data(data))),
        ));

        let fragments: Vec<String> = normalize(events, ChatCompletionsDecoder)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["Hello", "!"]);
    }

    #[test]
    fn test_decoder_is_strict() {
        assert!(!ChatCompletionsDecoder.lenient());
        assert!(matches!(
            ChatCompletionsDecoder.decode(&SseEvent::data("{broken")),
            Err(ProviderError::StreamDecode(_))
        ));
    }
}

use super::base::{AuthPlacement, BaseClient, ACCEPT_JSON};
use super::streaming::{self, FragmentStream, SseEvent, StreamDecoder};
use super::{error::ProviderError, ChatProvider, ProviderKind};
use crate::auth::Credential;
use crate::models::{Message, RequestConfig, Role, StreamFragment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const ANSWER_POINTER: &str = "/text";

/// Cohere chat request: the newest user turn goes in `message`,
/// everything before it in `chat_history`
#[derive(Debug, Serialize)]
struct CohereRequest<'a> {
    message: &'a str,
    chat_history: Vec<CohereTurn<'a>>,
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CohereTurn<'a> {
    role: &'static str,
    message: &'a str,
}

fn cohere_role(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Chatbot",
    }
}

/// Decoder for Cohere's newline-delimited JSON stream
///
/// `text-generation` events carry text; `stream-end` terminates.
/// Lenient: Cohere has been seen closing the stream with a truncated
/// final object, which must not discard the text already delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CohereDecoder;

impl StreamDecoder for CohereDecoder {
    fn lenient(&self) -> bool {
        true
    }

    fn decode(&self, event: &SseEvent) -> Result<StreamFragment, ProviderError> {
        let chunk = streaming::parse_event_json(event)?;

        match chunk.get("event_type").and_then(|v| v.as_str()) {
            Some("text-generation") => Ok(StreamFragment::from_text(
                chunk.get("text").and_then(|v| v.as_str()),
            )),
            Some("stream-end") => Ok(StreamFragment::terminal()),
            _ => Ok(StreamFragment::ignorable()),
        }
    }
}

/// Adapter for Cohere's chat endpoint
pub struct CohereProvider {
    base: BaseClient,
}

impl CohereProvider {
    pub fn new(
        credential: Credential,
        base_url: impl Into<String>,
        config: RequestConfig,
        http: Client,
    ) -> Self {
        Self {
            base: BaseClient::new(credential, AuthPlacement::Bearer, base_url, config, http),
        }
    }

    fn build_request<'a>(
        &'a self,
        history: &'a [Message],
        stream: bool,
    ) -> Result<CohereRequest<'a>, ProviderError> {
        let (latest, earlier) = match history.split_last() {
            Some((latest, earlier)) if latest.role == Role::User => (latest, earlier),
            _ => {
                return Err(ProviderError::Config(
                    "Cohere requests must end with a user message".to_string(),
                ))
            }
        };

        let config = self.base.config();
        Ok(CohereRequest {
            message: &latest.content,
            chat_history: earlier
                .iter()
                .map(|msg| CohereTurn {
                    role: cohere_role(msg.role),
                    message: &msg.content,
                })
                .collect(),
            model: &config.model_name,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: stream.then_some(true),
        })
    }
}

#[async_trait]
impl ChatProvider for CohereProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cohere
    }

    fn config(&self) -> &RequestConfig {
        self.base.config()
    }

    async fn complete_chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let url = self.base.endpoint("/chat", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, false)?)?;

        self.base.complete(url, body, ANSWER_POINTER).await
    }

    async fn stream_chat(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let url = self.base.endpoint("/chat", &[])?;
        let body = serde_json::to_vec(&self.build_request(history, true)?)?;

        let response = self.base.send(url, body, ACCEPT_JSON).await?;
        Ok(streaming::normalize(
            streaming::ndjson_events(response),
            CohereDecoder,
        ))
    }
}

use super::base::{AuthPlacement, BaseClient, ACCEPT_EVENT_STREAM};
use super::streaming::{self, FragmentStream, SseEvent, StreamDecoder};
use super::{error::ProviderError, ChatProvider, ProviderKind};
use crate::auth::Credential;
use crate::models::{Message, RequestConfig, Role, StreamFragment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const ANSWER_POINTER: &str = "/candidates/0/content/parts/0/text";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Gemini generateContent request format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    safety_settings: Vec<SafetySetting>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Decoder for Gemini SSE: each event is a partial response with text at
/// `candidates[0].content.parts[0].text`; the stream ends on close
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiDecoder;

impl StreamDecoder for GeminiDecoder {
    fn decode(&self, event: &SseEvent) -> Result<StreamFragment, ProviderError> {
        if event.data.trim() == "[DONE]" {
            return Ok(StreamFragment::terminal());
        }

        let chunk = streaming::parse_event_json(event)?;
        if let Some(error) = chunk.get("error") {
            return Err(ProviderError::StreamDecode(error.to_string()));
        }

        // Safety-rating and usage-only chunks have no parts
        Ok(StreamFragment::from_text(
            chunk.pointer(ANSWER_POINTER).and_then(|v| v.as_str()),
        ))
    }
}

/// Adapter for Google Gemini (AI Studio API key in the query string)
pub struct GeminiProvider {
    base: BaseClient,
}

impl GeminiProvider {
    pub fn new(
        credential: Credential,
        base_url: impl Into<String>,
        config: RequestConfig,
        http: Client,
    ) -> Self {
        Self {
            base: BaseClient::new(credential, AuthPlacement::Query("key"), base_url, config, http),
        }
    }

    fn method_path(&self, method: &str) -> String {
        format!("/models/{}:{}", self.base.config().model_name, method)
    }

    fn build_request<'a>(&'a self, history: &'a [Message]) -> GeminiRequest<'a> {
        let config = self.base.config();

        // Gemini rejects consecutive turns of one role; fold them into one content
        let mut contents: Vec<GeminiContent<'a>> = Vec::with_capacity(history.len());
        for msg in history {
            let role = gemini_role(msg.role);
            let part = GeminiPart { text: &msg.content };
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.push(part),
                _ => contents.push(GeminiContent {
                    role,
                    parts: vec![part],
                }),
            }
        }

        GeminiRequest {
            contents,
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
                top_p: 0.8,
                top_k: 10,
            },
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn config(&self) -> &RequestConfig {
        self.base.config()
    }

    async fn complete_chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let url = self.base.endpoint(&self.method_path("generateContent"), &[])?;
        let body = serde_json::to_vec(&self.build_request(history))?;

        self.base.complete(url, body, ANSWER_POINTER).await
    }

    async fn stream_chat(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let url = self
            .base
            .endpoint(&self.method_path("streamGenerateContent"), &[("alt", "sse")])?;
        let body = serde_json::to_vec(&self.build_request(history))?;

        let response = self.base.send(url, body, ACCEPT_EVENT_STREAM).await?;
        Ok(streaming::normalize(
            streaming::sse_events(response),
            GeminiDecoder,
        ))
    }
}

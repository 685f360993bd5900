//! Conversation state for one chat session with one provider.
//!
//! The handler owns the canonical history and appends to it only in
//! matched pairs: the user message goes in when a call starts, the
//! assistant message only when the answer arrived in full. A failed,
//! cancelled, timed-out or abandoned call leaves the user message alone
//! at the tail.

use crate::models::{Message, Role};
use crate::providers::error::ProviderError;
use crate::providers::ChatProvider;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lazy stream of text fragments borrowed from its handler
pub type ResponseStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'a>>;

/// Cancellation and deadline for a single call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }
}

/// Run `fut` until it finishes, the token fires, or the deadline passes
async fn bounded<T, F>(
    cancel: &CancellationToken,
    deadline: Option<(Instant, Duration)>,
    fut: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let timed = async {
        match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| ProviderError::Timeout(limit))?,
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = timed => result,
    }
}

/// A chat session: one provider plus the running history
pub struct ConversationHandler {
    name: String,
    provider: Box<dyn ChatProvider>,
    history: Vec<Message>,
    default_timeout: Option<Duration>,
}

impl ConversationHandler {
    pub fn new(name: impl Into<String>, provider: Box<dyn ChatProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            history: Vec::new(),
            default_timeout: None,
        }
    }

    /// Deadline applied by `get_response` and `stream_response`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Display name the handler was selected by
    pub fn provider_name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &dyn ChatProvider {
        self.provider.as_ref()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Start a new chat with the same provider
    pub fn reset(&mut self) {
        tracing::debug!("Resetting conversation with {}", self.name);
        self.history.clear();
    }

    fn default_context(&self) -> CallContext {
        CallContext::new().with_timeout(self.default_timeout)
    }

    pub async fn get_response(&mut self, user_text: &str) -> Result<String, ProviderError> {
        let ctx = self.default_context();
        self.get_response_with(user_text, ctx).await
    }

    /// Send `user_text` and wait for the whole answer
    pub async fn get_response_with(
        &mut self,
        user_text: &str,
        ctx: CallContext,
    ) -> Result<String, ProviderError> {
        self.history.push(Message::user(user_text));
        let deadline = ctx.timeout.map(|limit| (Instant::now() + limit, limit));

        let answer = bounded(
            &ctx.cancel,
            deadline,
            self.provider.complete_chat(&self.history),
        )
        .await
        .map_err(|e| {
            tracing::warn!("{} request failed: {}", self.name, e);
            e
        })?;

        self.history.push(Message::assistant(answer.clone()));
        Ok(answer)
    }

    pub fn stream_response(&mut self, user_text: &str) -> ResponseStream<'_> {
        let ctx = self.default_context();
        self.stream_response_with(user_text, ctx)
    }

    /// Send `user_text` and stream the answer
    ///
    /// The user message is recorded immediately. The assistant message is
    /// recorded only once the provider stream is exhausted; dropping the
    /// returned stream early records nothing further.
    pub fn stream_response_with<'a>(
        &'a mut self,
        user_text: &str,
        ctx: CallContext,
    ) -> ResponseStream<'a> {
        self.history.push(Message::user(user_text));

        Box::pin(async_stream::stream! {
            let deadline = ctx.timeout.map(|limit| (Instant::now() + limit, limit));

            let opened = bounded(
                &ctx.cancel,
                deadline,
                self.provider.stream_chat(&self.history),
            )
            .await;
            let mut fragments = match opened {
                Ok(fragments) => fragments,
                Err(e) => {
                    tracing::warn!("{} stream failed to open: {}", self.name, e);
                    yield Err(e);
                    return;
                }
            };

            let mut answer = String::new();
            loop {
                let next = bounded(&ctx.cancel, deadline, async {
                    Ok::<_, ProviderError>(fragments.next().await)
                })
                .await;

                match next {
                    Ok(Some(Ok(fragment))) => {
                        answer.push_str(&fragment);
                        yield Ok(fragment);
                    }
                    Ok(Some(Err(e))) | Err(e) => {
                        tracing::warn!("{} stream ended early: {}", self.name, e);
                        yield Err(e);
                        return;
                    }
                    Ok(None) => break,
                }
            }

            tracing::debug!("{} stream complete ({} bytes)", self.name, answer.len());
            self.history.push(Message::assistant(answer));
        })
    }

    /// History as `You:` / `LLM:` blocks separated by blank lines
    pub fn export_conversation(&self) -> String {
        self.history
            .iter()
            .map(|msg| match msg.role {
                Role::User => format!("You: {}", msg.content),
                Role::Assistant => format!("LLM: {}", msg.content),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

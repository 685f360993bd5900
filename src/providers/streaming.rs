use super::error::ProviderError;
use crate::models::{FragmentKind, StreamFragment};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use pin_project::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Raw events after framing, before provider decoding
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, ProviderError>> + Send>>;

/// Ordered assistant text deltas
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// One framed event from a provider.
/// NDJSON lines are carried with `event: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// Parse SSE events from complete text
pub fn parse_sse_events(input: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current_event: Option<String> = None;
    let mut current_data = String::new();
    let mut has_data = false;

    for line in input.lines() {
        if line.is_empty() {
            // Empty line marks end of event
            if has_data {
                events.push(SseEvent {
                    event: current_event.take(),
                    data: std::mem::take(&mut current_data),
                });
                has_data = false;
            }
            current_event = None;
        } else if let Some(data) = field_value(line, "data") {
            if has_data {
                current_data.push('\n');
            }
            current_data.push_str(data);
            has_data = true;
        } else if let Some(event) = field_value(line, "event") {
            current_event = Some(event.to_string());
        }
        // Comments (":") and "id:", "retry:" are ignored
    }

    // Handle case where stream doesn't end with empty line
    if has_data {
        events.push(SseEvent {
            event: current_event,
            data: current_data,
        });
    }

    events
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Append bytes to `out`, holding back a UTF-8 sequence split across chunks
fn append_utf8(pending: &mut Vec<u8>, out: &mut String, bytes: &[u8]) {
    pending.extend_from_slice(bytes);

    match std::str::from_utf8(pending) {
        Ok(text) => {
            out.push_str(text);
            pending.clear();
        }
        Err(e) if e.error_len().is_none() => {
            // Incomplete trailing sequence; keep it for the next chunk
            let valid = e.valid_up_to();
            out.push_str(&String::from_utf8_lossy(&pending[..valid]));
            pending.drain(..valid);
        }
        Err(_) => {
            out.push_str(&String::from_utf8_lossy(pending));
            pending.clear();
        }
    }
}

/// Stream adapter that frames a byte stream into SSE events
///
/// Events may arrive split across chunks or several to a chunk.
#[pin_project]
pub struct SseStream<S> {
    #[pin]
    inner: S,
    buffer: String,
    pending: Vec<u8>,
    ready: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: String::new(),
            pending: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    append_utf8(this.pending, this.buffer, &bytes);
                    if this.buffer.contains('\r') {
                        *this.buffer = this.buffer.replace("\r\n", "\n");
                    }

                    // Only parse blocks terminated by a blank line
                    while let Some(end) = this.buffer.find("\n\n") {
                        let block: String = this.buffer.drain(..end + 2).collect();
                        this.ready.extend(parse_sse_events(&block));
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    // Stream ended - flush whatever is left
                    *this.finished = true;
                    if !this.pending.is_empty() {
                        this.buffer.push_str(&String::from_utf8_lossy(this.pending));
                        this.pending.clear();
                    }
                    if !this.buffer.is_empty() {
                        this.ready.extend(parse_sse_events(this.buffer));
                        this.buffer.clear();
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream adapter that frames newline-delimited JSON into one event per line
#[pin_project]
pub struct NdjsonStream<S> {
    #[pin]
    inner: S,
    buffer: String,
    pending: Vec<u8>,
    ready: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: String::new(),
            pending: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }
}

fn push_line(ready: &mut VecDeque<SseEvent>, line: &str) {
    let line = line.trim_end_matches('\r');
    if !line.trim().is_empty() {
        ready.push_back(SseEvent::data(line));
    }
}

impl<S, E> Stream for NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    append_utf8(this.pending, this.buffer, &bytes);
                    while let Some(end) = this.buffer.find('\n') {
                        let line: String = this.buffer.drain(..end + 1).collect();
                        push_line(this.ready, &line[..end]);
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    *this.finished = true;
                    if !this.pending.is_empty() {
                        this.buffer.push_str(&String::from_utf8_lossy(this.pending));
                        this.pending.clear();
                    }
                    let rest = std::mem::take(this.buffer);
                    push_line(this.ready, &rest);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Frame a streaming HTTP response body as server-sent events
pub fn sse_events(response: reqwest::Response) -> RawEventStream {
    Box::pin(SseStream::new(
        response.bytes_stream().map_err(ProviderError::from),
    ))
}

/// Frame a streaming HTTP response body as newline-delimited JSON
pub fn ndjson_events(response: reqwest::Response) -> RawEventStream {
    Box::pin(NdjsonStream::new(
        response.bytes_stream().map_err(ProviderError::from),
    ))
}

/// Per-provider event decoding
pub trait StreamDecoder: Send + Sync + 'static {
    /// Whether undecodable events are skipped instead of failing the stream.
    /// Only set for providers known to emit a malformed trailing chunk.
    fn lenient(&self) -> bool {
        false
    }

    fn decode(&self, event: &SseEvent) -> Result<StreamFragment, ProviderError>;
}

/// Drive raw events through a decoder, yielding text deltas in arrival order.
///
/// Ends at a terminal fragment or when the transport closes.
pub fn normalize<D: StreamDecoder>(events: RawEventStream, decoder: D) -> FragmentStream {
    Box::pin(async_stream::stream! {
        let mut events = events;

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            match decoder.decode(&event) {
                Ok(StreamFragment { kind: FragmentKind::Terminal, .. }) => {
                    tracing::debug!("Stream finished with terminal event");
                    return;
                }
                Ok(StreamFragment { kind: FragmentKind::Delta, text: Some(text) }) => {
                    yield Ok(text);
                }
                Ok(_) => {
                    tracing::trace!("Skipping control event: {:?}", event.event);
                }
                Err(e) if decoder.lenient() => {
                    tracing::warn!("Skipping undecodable stream event: {}", e);
                }
                Err(e) => {
                    tracing::error!("Stream decode failed: {} - Data: {}", e, event.data);
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Parse event data as JSON, mapping failure to `StreamDecode`
pub(crate) fn parse_event_json(event: &SseEvent) -> Result<serde_json::Value, ProviderError> {
    serde_json::from_str(&event.data)
        .map_err(|e| ProviderError::StreamDecode(format!("{}: {}", e, event.data)))
}

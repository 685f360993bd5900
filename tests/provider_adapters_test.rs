use futures::TryStreamExt;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use tinychat::auth::StaticCredentials;
use tinychat::models::Role;
use tinychat::{Message, ProviderError, ProviderKind, ProviderRegistry};

fn credentials() -> StaticCredentials {
    StaticCredentials::new()
        .with("OPENAI_API_KEY", "sk-test")
        .with("MISTRAL_API_KEY", "mi-test")
        .with("TOGETHER_API_KEY", "tg-test")
        .with("COHERE_API_KEY", "co-test")
        .with("GOOGLE_API_KEY", "g-test")
        .with("ANTHROPIC_API_KEY", "ak-test")
}

/// Registry whose every provider points at the mock server
fn registry(server: &ServerGuard) -> ProviderRegistry {
    ProviderKind::ALL
        .into_iter()
        .fold(ProviderRegistry::new(Arc::new(credentials())), |registry, kind| {
            registry.with_endpoint(kind, server.url())
        })
}

#[tokio::test]
async fn test_openai_success_appends_exchange() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"chatcmpl-1","choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},"finish_reason":"stop"}]}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("GPT-3.5 Turbo", 0.5).unwrap();
    let answer = handler.get_response("hi").await.unwrap();

    assert_eq!(answer, "Hello there");
    assert_eq!(
        handler.history(),
        &[Message::user("hi"), Message::assistant("Hello there")]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_second_turn_sends_full_history() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Json(json!({
            "model": "gpt-4-turbo-preview",
            "messages": [{"role": "user", "content": "one"}],
            "temperature": 1.0
        })))
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"first"}}]}"#)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"messages": [
            {"role": "user", "content": "one"},
            {"role": "assistant", "content": "first"},
            {"role": "user", "content": "two"}
        ]})))
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"second"}}]}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("GPT-4 Turbo", 1.0).unwrap();
    handler.get_response("one").await.unwrap();
    assert_eq!(handler.get_response("two").await.unwrap(), "second");

    assert_eq!(handler.history().len(), 4);
    second.assert_async().await;
}

#[tokio::test]
async fn test_http_error_keeps_only_user_message() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/messages")
        .with_status(400)
        .with_body(r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("Claude 3 Opus", 1.0).unwrap();
    let result = handler.get_response("hi").await;

    assert!(matches!(result, Err(ProviderError::Http { status: 400 })));
    assert_eq!(handler.history(), &[Message::user("hi")]);
}

#[tokio::test]
async fn test_missing_answer_path_is_response_format_error() {
    let mut server = Server::new_async().await;
    let body = r#"{"generation_id":"g1","meta":{}}"#;
    server
        .mock("POST", "/chat")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("Cohere Chat", 1.0).unwrap();
    match handler.get_response("hi").await {
        Err(ProviderError::ResponseFormat { raw_body }) => assert_eq!(raw_body, body),
        other => panic!("expected ResponseFormat, got {:?}", other),
    }
    assert_eq!(handler.history().len(), 1);
    assert_eq!(handler.history()[0].role, Role::User);
}

#[tokio::test]
async fn test_every_provider_yields_same_answer_from_native_shape() {
    let cases = [
        (
            "GPT-3.5 Turbo",
            "/chat/completions",
            json!({"choices": [{"message": {"role": "assistant", "content": "Paris"}}]}),
        ),
        (
            "Mistral Large",
            "/chat/completions",
            json!({"choices": [{"message": {"role": "assistant", "content": "Paris"}}]}),
        ),
        (
            "Llama 3 70B",
            "/chat/completions",
            json!({"choices": [{"message": {"role": "assistant", "content": "Paris"}}]}),
        ),
        ("Cohere Chat", "/chat", json!({"text": "Paris", "generation_id": "g1"})),
        (
            "Gemini 1.5 Pro",
            "/models/gemini-1.5-pro-latest:generateContent",
            json!({"candidates": [{"content": {"parts": [{"text": "Paris"}], "role": "model"}}]}),
        ),
        (
            "Claude 3 Sonnet",
            "/v1/messages",
            json!({"content": [{"type": "text", "text": "Paris"}], "role": "assistant"}),
        ),
    ];

    for (name, path, body) in cases {
        let mut server = Server::new_async().await;
        server
            .mock("POST", path)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let mut handler = registry(&server).select_provider(name, 0.0).unwrap();
        handler.get_response("hello").await.unwrap_or_else(|e| panic!("{}: {}", name, e));
        handler.get_response("hello").await.unwrap();

        assert_eq!(
            handler.history(),
            &[
                Message::user("hello"),
                Message::assistant("Paris"),
                Message::user("hello"),
                Message::assistant("Paris"),
            ],
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_gemini_key_travels_in_query_not_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-1.5-pro-latest:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "g-test".into()))
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 4096, "topK": 10}
        })))
        .with_status(200)
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("Gemini 1.5 Pro", 0.9).unwrap();
    assert_eq!(handler.get_response("hi").await.unwrap(), "ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_sends_key_and_version_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "ak-test")
        .match_header("anthropic-version", "2023-06-01")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 4096
        })))
        .with_status(200)
        .with_body(r#"{"content":[{"type":"text","text":"hi"}]}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("Claude 3 Opus", 1.0).unwrap();
    handler.get_response("hello").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cohere_moves_prior_turns_into_chat_history() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat")
        .match_body(Matcher::PartialJson(json!({"message": "first", "chat_history": []})))
        .with_status(200)
        .with_body(r#"{"text":"one"}"#)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/chat")
        .match_body(Matcher::PartialJson(json!({
            "message": "second",
            "chat_history": [
                {"role": "User", "message": "first"},
                {"role": "Chatbot", "message": "one"}
            ]
        })))
        .with_status(200)
        .with_body(r#"{"text":"two"}"#)
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("Cohere Chat", 1.0).unwrap();
    handler.get_response("first").await.unwrap();
    assert_eq!(handler.get_response("second").await.unwrap(), "two");
    second.assert_async().await;
}

async fn assert_streams_hello(server: &ServerGuard, name: &str) {
    let mut handler = registry(server).select_provider(name, 1.0).unwrap();

    let fragments: Vec<String> = handler.stream_response("hi").try_collect().await.unwrap();

    assert_eq!(fragments, vec!["Hello", "!"], "{}", name);
    assert_eq!(
        handler.history(),
        &[Message::user("hi"), Message::assistant("Hello!")],
        "{}",
        name
    );
}

#[tokio::test]
async fn test_openai_compatible_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_header("accept", "text/event-stream")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;

    assert_streams_hello(&server, "Mistral-7B").await;
}

#[tokio::test]
async fn test_anthropic_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/messages")
        .match_header("accept", "text/event-stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: ping\ndata: {\"type\": \"ping\"}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"!\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ))
        .create_async()
        .await;

    assert_streams_hello(&server, "Claude 3 Sonnet").await;
}

#[tokio::test]
async fn test_gemini_stream_with_crlf_framing() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/models/gemini-1.5-pro-latest:streamGenerateContent")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("alt".into(), "sse".into()),
            Matcher::UrlEncoded("key".into(), "g-test".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}],\"role\":\"model\"}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        ))
        .create_async()
        .await;

    assert_streams_hello(&server, "Gemini 1.5 Pro").await;
}

#[tokio::test]
async fn test_cohere_ndjson_stream_tolerates_truncated_tail() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat")
        // NDJSON, not SSE: the stream request asks for plain JSON
        .match_header("accept", "application/json")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "application/stream+json")
        .with_body(concat!(
            "{\"is_finished\":false,\"event_type\":\"stream-start\",\"generation_id\":\"g1\"}\n",
            "{\"is_finished\":false,\"event_type\":\"text-generation\",\"text\":\"Hello\"}\n",
            "{\"is_finished\":false,\"event_type\":\"text-generation\",\"text\":\"!\"}\n",
            "{\"is_finished\":true,\"event_type\":\"stream-e",
        ))
        .create_async()
        .await;

    assert_streams_hello(&server, "Cohere Chat").await;
}

#[tokio::test]
async fn test_stream_http_error_appends_no_answer() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("GPT-4 Turbo", 1.0).unwrap();
    let result: Result<Vec<String>, _> = handler.stream_response("hi").try_collect().await;

    assert!(matches!(result, Err(ProviderError::Http { status: 503 })));
    assert_eq!(handler.history(), &[Message::user("hi")]);
}

#[tokio::test]
async fn test_malformed_event_fails_strict_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":\n\n",
        ))
        .create_async()
        .await;

    let mut handler = registry(&server).select_provider("GPT-4 Turbo", 1.0).unwrap();
    let result: Result<Vec<String>, _> = handler.stream_response("hi").try_collect().await;

    assert!(matches!(result, Err(ProviderError::StreamDecode(_))));
    assert_eq!(handler.history(), &[Message::user("hi")]);
}

#[tokio::test]
async fn test_transport_error_hides_query_key() {
    let credentials = StaticCredentials::new().with("GOOGLE_API_KEY", "g-secret-key-123");
    // Nothing listens on port 1
    let registry = ProviderRegistry::new(Arc::new(credentials))
        .with_endpoint(ProviderKind::Google, "http://127.0.0.1:1/v1beta");

    let mut handler = registry.select_provider("Gemini 1.5 Pro", 1.0).unwrap();
    let error = handler.get_response("hi").await.unwrap_err();

    assert!(matches!(error, ProviderError::Transport(_)), "{:?}", error);
    assert!(error.is_retryable());
    assert!(!error.to_string().contains("g-secret-key-123"), "{}", error);
    assert!(!format!("{:?}", error).contains("g-secret-key-123"));
    assert_eq!(handler.history(), &[Message::user("hi")]);
}


mod common;

use futures::stream;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chorus::config::{AzureDeploymentConfig, ClaudeRelayConfig, GeminiConfig};
use chorus::error::ChorusError;
use chorus::provider::{
    decode_text_stream, AzureOpenAiAdapter, GeminiAdapter, ProviderAdapter, RelayAdapter,
    RelayFraming, StreamOptions,
};
use common::{collect, sse};

fn gemini_config(base_url: String) -> GeminiConfig {
    GeminiConfig {
        enabled: true,
        api_key: Some("gemini-key".to_string()),
        model: "gemini-pro".to_string(),
        base_url,
    }
}

fn azure_config(endpoint: String) -> AzureDeploymentConfig {
    AzureDeploymentConfig {
        name: "GPT-4 Turbo".to_string(),
        enabled: true,
        endpoint: Some(endpoint),
        api_key: Some("azure-key".to_string()),
        deployment: "gpt-4-turbo".to_string(),
        api_version: "2024-02-01".to_string(),
        endpoint_var: "AZURE_ENDPOINT",
        key_var: "AZURE_KEY",
    }
}

fn relay_config(relay_url: String) -> ClaudeRelayConfig {
    ClaudeRelayConfig {
        enabled: true,
        relay_url,
        model: "claude-3-opus-20240229".to_string(),
        max_tokens: 1024,
        framing: RelayFraming::Raw,
    }
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn gemini_streams_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "gemini-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        })))
        .respond_with(event_stream(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"},"index":0}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":", world"}],"role":"model"},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":1}}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(reqwest::Client::new(), &gemini_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn gemini_http_error_carries_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(reqwest::Client::new(), &gemini_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert_eq!(text, "");
    match error {
        Some(ChorusError::Backend { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "API key not valid");
        }
        other => panic!("Expected Backend error, got: {other:?}"),
    }
}

#[tokio::test]
async fn gemini_malformed_chunk_fails_after_earlier_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#,
            "{not json",
        ])))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(reqwest::Client::new(), &gemini_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert_eq!(text, "partial");
    assert!(matches!(error, Some(ChorusError::Decode(_))), "got: {error:?}");
}

#[tokio::test]
async fn gemini_safety_stop_after_text_fails_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Once upon"}],"role":"model"},"index":0}]}"#,
            r#"{"candidates":[{"finishReason":"SAFETY","index":0}]}"#,
        ])))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(reqwest::Client::new(), &gemini_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert_eq!(text, "Once upon");
    match error {
        Some(ChorusError::Backend { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Response blocked: SAFETY");
        }
        other => panic!("Expected Backend error, got: {other:?}"),
    }
}

#[tokio::test]
async fn azure_skips_metadata_chunks_and_stops_at_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4-turbo/chat/completions"))
        .and(query_param("api-version", "2024-02-01"))
        .and(header("api-key", "azure-key"))
        .and(body_partial_json(json!({"stream": true, "max_tokens": 64})))
        .respond_with(event_stream(sse(&[
            r#"{"id":"","object":"","created":0,"model":"","choices":[],"prompt_filter_results":[{"prompt_index":0,"content_filter_results":{}}]}"#,
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"content":", world"}}]}"#,
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let adapter =
        AzureOpenAiAdapter::new(reqwest::Client::new(), &azure_config(server.uri())).unwrap();
    let options = StreamOptions {
        max_tokens: Some(64),
        temperature: None,
    };
    let (text, error) = collect(adapter.stream("hi", &options)).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn azure_rate_limit_fails_with_its_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": "429", "message": "Rate limit is exceeded."}
        })))
        .mount(&server)
        .await;

    let adapter =
        AzureOpenAiAdapter::new(reqwest::Client::new(), &azure_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert_eq!(text, "");
    match error {
        Some(ChorusError::Upstream(message)) => assert!(message.contains("429"), "{message}"),
        other => panic!("Expected Upstream error, got: {other:?}"),
    }
}

#[tokio::test]
async fn azure_malformed_chunk_fails_after_earlier_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(sse(&[
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"content":"partial"}}]}"#,
            "{not json",
        ])))
        .mount(&server)
        .await;

    let adapter =
        AzureOpenAiAdapter::new(reqwest::Client::new(), &azure_config(server.uri())).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert_eq!(text, "partial");
    assert!(matches!(error, Some(ChorusError::Decode(_))), "got: {error:?}");
}

#[tokio::test]
async fn adapter_stream_is_lazy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(sse(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let adapter =
        AzureOpenAiAdapter::new(reqwest::Client::new(), &azure_config(server.uri())).unwrap();
    let stream = adapter.stream("hi", &StreamOptions::default());
    drop(stream);
}

#[tokio::test]
async fn relay_raw_body_is_accumulated_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/anthropic"))
        .and(body_partial_json(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 1024,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .respond_with(event_stream("Hello, world".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = RelayAdapter::new(
        reqwest::Client::new(),
        &relay_config(format!("{}/api/anthropic", server.uri())),
    )
    .unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn relay_server_error_surfaces_its_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("Missing ANTHROPIC_API_KEY environment variable"),
        )
        .mount(&server)
        .await;

    let adapter = RelayAdapter::new(
        reqwest::Client::new(),
        &relay_config(format!("{}/api/anthropic", server.uri())),
    )
    .unwrap();
    let (_, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    match error {
        Some(ChorusError::Backend { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "Missing ANTHROPIC_API_KEY environment variable");
        }
        other => panic!("Expected Backend error, got: {other:?}"),
    }
}

#[tokio::test]
async fn relay_event_framing_extracts_text_deltas() {
    let server = MockServer::start().await;
    let body = [
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\ndata: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\", world\"}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]
    .concat();
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = ClaudeRelayConfig {
        framing: RelayFraming::AnthropicSse,
        ..relay_config(format!("{}/api/anthropic", server.uri()))
    };
    let adapter = RelayAdapter::new(reqwest::Client::new(), &config).unwrap();
    let (text, error) = collect(adapter.stream("hi", &StreamOptions::default())).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn split_multibyte_character_is_never_mangled() {
    // "hあ!" with the three bytes of 'あ' spread over three chunks.
    let chunks: Vec<Result<Vec<u8>, ChorusError>> = vec![
        Ok(b"h\xE3".to_vec()),
        Ok(b"\x81".to_vec()),
        Ok(b"\x82!".to_vec()),
    ];

    let deltas: Vec<String> = decode_text_stream(stream::iter(chunks))
        .map(|delta| delta.unwrap().into_string())
        .collect()
        .await;

    assert_eq!(deltas, vec!["h".to_string(), "あ!".to_string()]);
    assert!(!deltas.concat().contains('\u{FFFD}'));
}

#[tokio::test]
async fn truncated_character_at_end_of_body_becomes_replacement() {
    let chunks: Vec<Result<Vec<u8>, ChorusError>> = vec![Ok(b"ok\xE3\x81".to_vec())];

    let text: String = decode_text_stream(stream::iter(chunks))
        .map(|delta| delta.unwrap().into_string())
        .collect::<Vec<_>>()
        .await
        .concat();

    assert_eq!(text, "ok\u{FFFD}");
}

#[tokio::test]
async fn transport_error_mid_body_fails_the_stream() {
    let chunks: Vec<Result<Vec<u8>, ChorusError>> = vec![
        Ok(b"partial".to_vec()),
        Err(ChorusError::Decode("connection reset".to_string())),
    ];

    let mut deltas = Box::pin(decode_text_stream(stream::iter(chunks)));
    assert_eq!(deltas.next().await.unwrap().unwrap().as_str(), "partial");
    assert!(matches!(deltas.next().await, Some(Err(ChorusError::Decode(_)))));
}

use aisource::inference::{
    ChatClient, ChatMessage, ChatRequest, GeminiConfig, GeminiProvider, MediaPayload,
    MediaRequest, OpenAiProvider, OpenRouterProvider, ProviderError, SendOptions, StreamSink,
};
use aisource::inference::providers::OpenRouterAttribution;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn sse(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|line| format!("data: {line}\n\n"))
        .collect()
}

/// Drains every chunk the provider forwarded.
async fn collect_chunks(mut receiver: mpsc::Receiver<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(chunk) = receiver.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn gemini(server: &MockServer) -> GeminiProvider {
    GeminiProvider::new(
        "test-key".to_string(),
        Some(server.uri()),
        GeminiConfig::default(),
    )
}

fn openrouter(server: &MockServer) -> OpenRouterProvider {
    OpenRouterProvider::new(
        "test-key".to_string(),
        Some(server.uri()),
        OpenRouterAttribution::default(),
    )
}

const GEMINI_STREAM_PATH: &str = "/v1beta/models/gemini-2.5-pro:streamGenerateContent";

// ============================================================================
// Gemini Provider Tests
// ============================================================================

#[tokio::test]
async fn test_gemini_chat_streams_in_order() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"candidates":[{"content":{"parts":[{"text":"A "}]}}]}"#,
        r#"{"candidates":[{"content":{"parts":[{"text":"cat."}]}}]}"#,
        r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#,
    ]);

    Mock::given(method("POST"))
        .and(path(GEMINI_STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = gemini(&mock_server);
    let messages = [ChatMessage::user("Describe the picture")];
    let (tx, rx) = mpsc::channel(16);
    let result = provider
        .send_chat(ChatRequest::new(&messages), StreamSink::channel(tx))
        .await
        .unwrap();

    assert_eq!(result, "A cat.");
    assert_eq!(collect_chunks(rx).await, vec!["A ", "cat."]);
}

#[tokio::test]
async fn test_gemini_grounding_appends_online_search_block() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"candidates":[{"content":{"parts":[{"text":"Rust 1.80 "}]}}]}"#,
        r#"{"candidates":[{"content":{"parts":[{"text":"was released."}]},"groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://blog.rust-lang.org","title":"Rust Blog"}},{"web":{"uri":"https://blog.rust-lang.org","title":"Again"}},{"web":{"uri":"https://news.example"}}],"webSearchQueries":["rust 1.80 release"]}}]}"#,
    ]);

    Mock::given(method("POST"))
        .and(path(GEMINI_STREAM_PATH))
        .and(body_partial_json(serde_json::json!({"tools": [{"googleSearch": {}}]})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = gemini(&mock_server);
    let messages = [ChatMessage::user("What's new in Rust?")];
    let mut request = ChatRequest::new(&messages);
    request.options = SendOptions::online();

    let result = provider.send_chat(request, StreamSink::silent()).await.unwrap();

    assert_eq!(
        result,
        "Rust 1.80 was released.\n\n### ONLINE_SEARCH\n\
         #1 - [Rust Blog](https://blog.rust-lang.org)\n\
         #2 - [https://news.example](https://news.example)\n\
         Queries: rust 1.80 release"
    );
}

#[tokio::test]
async fn test_gemini_media_request_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GEMINI_STREAM_PATH))
        .and(body_partial_json(serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": "You are terse."}]},
                {"role": "user", "parts": [
                    {"text": "What is this?"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]}
            ],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": -1}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"A PNG."}]}}]}"#,
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut provider = gemini(&mock_server);
    provider.add_system_prompt("You are terse.".to_string());

    let media = MediaPayload::parse("iVBORw0KGgo=");
    let mut request = MediaRequest::new(&media, "image/png");
    request.prompt = Some("What is this?");

    let result = provider.send_media(request, StreamSink::silent()).await.unwrap();
    assert_eq!(result, "A PNG.");
}

#[tokio::test]
async fn test_gemini_model_listing_follows_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "models/gemini-2.5-flash"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "models/gemini-2.5-pro", "displayName": "Gemini 2.5 Pro"}],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let models = gemini(&mock_server).available_models().await.unwrap();
    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["models/gemini-2.5-pro", "models/gemini-2.5-flash"]);
    assert_eq!(models[0].display_name, "Gemini 2.5 Pro");
    assert_eq!(models[1].display_name, "models/gemini-2.5-flash");
}

#[tokio::test]
async fn test_gemini_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GEMINI_STREAM_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .mount(&mock_server)
        .await;

    let messages = [ChatMessage::user("Hello")];
    let result = gemini(&mock_server)
        .send_chat(ChatRequest::new(&messages), StreamSink::silent())
        .await;

    match result {
        Err(ProviderError::Api { status, message }) => {
            assert_eq!(status, 403);
            assert!(message.contains("API key not valid"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

// ============================================================================
// OpenAI Provider Tests
// ============================================================================

#[tokio::test]
async fn test_openai_chat_completions_stream() {
    let mock_server = MockServer::start().await;
    let body = format!(
        "{}data: [DONE]\n\n",
        sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"choices":[{"delta":{"content":" world"}}]}"#,
        ])
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    provider.add_system_prompt("Be brief.".to_string());

    let messages = [ChatMessage::user("  Hi  "), ChatMessage::assistant("   ")];
    let (tx, rx) = mpsc::channel(16);
    let result = provider
        .send_chat(ChatRequest::new(&messages), StreamSink::channel(tx))
        .await
        .unwrap();

    assert_eq!(result, "Hello world");
    assert_eq!(collect_chunks(rx).await, vec!["Hello", " world"]);
}

#[tokio::test]
async fn test_openai_media_uses_responses_api() {
    let mock_server = MockServer::start().await;
    let body = "\
event: response.created
data: {\"type\":\"response.created\"}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"delta\":\"A \"}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"delta\":\"cat.\"}

event: response.completed
data: {\"type\":\"response.completed\"}
";

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "stream": true,
            "input": [{"role": "user", "content": [
                {"type": "input_text", "text": "What animal?"},
                {"type": "input_image", "image_url": "https://example.com/cat.jpg"}
            ]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let media = MediaPayload::parse("https://example.com/cat.jpg");
    let mut request = MediaRequest::new(&media, "image/jpeg");
    request.prompt = Some("What animal?");

    let (tx, rx) = mpsc::channel(16);
    let result = provider.send_media(request, StreamSink::channel(tx)).await.unwrap();

    assert_eq!(result, "A cat.");
    assert_eq!(collect_chunks(rx).await, vec!["A ", "cat."]);
}

#[tokio::test]
async fn test_openai_web_search_fallback_retries_without_tool() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(serde_json::json!({
            "tools": [{"type": "web_search_preview"}]
        })))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error":{"message":"Web search options not supported with this model."}}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            r#"{"type":"response.output_text.delta","delta":"No search, "}"#,
            r#"{"type":"response.output_text.delta","delta":"still here."}"#,
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let messages = [ChatMessage::user("Latest news?")];
    let mut request = ChatRequest::new(&messages);
    request.model = Some("gpt-4o-mini");
    request.options = SendOptions::online();

    let result = provider.send_chat(request, StreamSink::silent()).await.unwrap();
    assert_eq!(result, "No search, still here.");
}

#[tokio::test]
async fn test_openai_other_errors_are_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal server error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let messages = [ChatMessage::user("Latest news?")];
    let mut request = ChatRequest::new(&messages);
    request.options = SendOptions::online();

    match provider.send_chat(request, StreamSink::silent()).await {
        Err(ProviderError::Api { status, .. }) => assert_eq!(status, 500),
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_model_listing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": "gpt-4o"}, {"id": "o3"}]
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let models = provider.available_models().await.unwrap();
    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "o3"]);
    assert_eq!(models[1].display_name, "o3");
}

// ============================================================================
// OpenRouter Provider Tests
// ============================================================================

#[tokio::test]
async fn test_openrouter_citations_appended_and_emitted() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Tokio 1.40 is out."}}]}"#,
        r#"{"choices":[{"delta":{"content":"","annotations":[{"type":"url_citation","url_citation":{"url":"https://tokio.rs/blog","title":"Tokio Blog"}},{"type":"url_citation","url_citation":{"url":"https://crates.io/crates/tokio"}}]}}]}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("HTTP-Referer", "https://skidhw.serina.in"))
        .and(header("X-Title", "Serina-chan Helper"))
        .and(body_partial_json(serde_json::json!({"plugins": [{"id": "web"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = openrouter(&mock_server);
    let messages = [ChatMessage::user("Tokio news?")];
    let mut request = ChatRequest::new(&messages);
    request.options = SendOptions::online();

    let (tx, rx) = mpsc::channel(16);
    let result = provider.send_chat(request, StreamSink::channel(tx)).await.unwrap();

    let block = "### ONLINE_SEARCH\n\
                 #1 - [Tokio Blog](https://tokio.rs/blog)\n\
                 #2 - [https://crates.io/crates/tokio](https://crates.io/crates/tokio)";
    assert_eq!(result, format!("Tokio 1.40 is out.\n\n{block}"));
    assert_eq!(
        collect_chunks(rx).await,
        vec!["Tokio 1.40 is out.".to_string(), format!("\n\n{block}")]
    );
}

#[tokio::test]
async fn test_openrouter_text_file_is_inlined() {
    let mock_server = MockServer::start().await;

    // "hello file" in base64
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Summarize"},
                {"type": "text", "text": "\n\n[File Content]\nhello file\n\n"}
            ]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            r#"{"choices":[{"delta":{"content":"A greeting."}}]}"#,
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = openrouter(&mock_server);
    let media = MediaPayload::parse("aGVsbG8gZmlsZQ==");
    let mut request = MediaRequest::new(&media, "text/plain");
    request.prompt = Some("Summarize");

    let result = provider.send_media(request, StreamSink::silent()).await.unwrap();
    assert_eq!(result, "A greeting.");
}

#[tokio::test]
async fn test_openrouter_receiver_dropped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
        ])))
        .mount(&mock_server)
        .await;

    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let messages = [ChatMessage::user("Hello")];
    let result = openrouter(&mock_server)
        .send_chat(ChatRequest::new(&messages), StreamSink::channel(tx))
        .await;

    assert!(matches!(result, Err(ProviderError::ChannelClosed)));
}

#[tokio::test]
async fn test_openrouter_malformed_chunk_is_parse_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: {not json}\n\n"))
        .mount(&mock_server)
        .await;

    let messages = [ChatMessage::user("Hello")];
    let result = openrouter(&mock_server)
        .send_chat(ChatRequest::new(&messages), StreamSink::silent())
        .await;

    assert!(matches!(result, Err(ProviderError::Parse(_))));
}

#[tokio::test]
async fn test_openrouter_network_error() {
    let provider = OpenRouterProvider::new(
        "test-key".to_string(),
        Some("http://localhost:1".to_string()),
        OpenRouterAttribution::default(),
    );

    let messages = [ChatMessage::user("Hello")];
    let result = provider
        .send_chat(ChatRequest::new(&messages), StreamSink::silent())
        .await;

    assert!(matches!(result, Err(ProviderError::Network(_))));
}

// ============================================================================
// Errors Reported Inside a Successful Stream
// ============================================================================

#[tokio::test]
async fn test_gemini_error_chunk_fails_request() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"candidates":[{"content":{"parts":[{"text":"Half an "}]}}]}"#,
        r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#,
    ]);

    Mock::given(method("POST"))
        .and(path(GEMINI_STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let messages = [ChatMessage::user("Hello")];
    let (tx, rx) = mpsc::channel(16);
    let result = gemini(&mock_server)
        .send_chat(ChatRequest::new(&messages), StreamSink::channel(tx))
        .await;

    match result {
        Err(ProviderError::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "The model is overloaded.");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
    assert_eq!(collect_chunks(rx).await, vec!["Half an "]);
}

#[tokio::test]
async fn test_openai_responses_error_event_fails_request() {
    let mock_server = MockServer::start().await;
    let body = "\
event: response.created
data: {\"type\":\"response.created\"}

event: error
data: {\"code\":\"server_error\",\"message\":\"The server had an error while processing your request.\"}

";

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let media = MediaPayload::parse("https://example.com/cat.jpg");
    let result = provider
        .send_media(MediaRequest::new(&media, "image/jpeg"), StreamSink::silent())
        .await;

    match result {
        Err(ProviderError::Api { message, .. }) => {
            assert!(message.contains("server had an error"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_response_failed_event_fails_request() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"type":"response.output_text.delta","delta":"Partial"}"#,
        r#"{"type":"response.failed","response":{"status":"failed","error":{"code":"server_error","message":"Response generation failed"}}}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let messages = [ChatMessage::user("Latest news?")];
    let mut request = ChatRequest::new(&messages);
    request.options = SendOptions::online();

    match provider.send_chat(request, StreamSink::silent()).await {
        Err(ProviderError::Api { message, .. }) => {
            assert_eq!(message, "Response generation failed");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openrouter_mid_stream_error_fails_request() {
    let mock_server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Partial"}}]}"#,
        r#"{"error":{"code":502,"message":"Provider disconnected unexpectedly"},"choices":[{"delta":{"content":""},"finish_reason":"error"}]}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let messages = [ChatMessage::user("Hello")];
    let (tx, rx) = mpsc::channel(16);
    let result = openrouter(&mock_server)
        .send_chat(ChatRequest::new(&messages), StreamSink::channel(tx))
        .await;

    match result {
        Err(ProviderError::Api { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "Provider disconnected unexpectedly");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
    assert_eq!(collect_chunks(rx).await, vec!["Partial"]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_while_waiting_for_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse(&[r#"{"choices":[{"delta":{"content":"late"}}]}"#]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&mock_server)
        .await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let messages = [ChatMessage::user("Hello")];
    let sink = StreamSink::silent().with_cancellation(token);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        openrouter(&mock_server).send_chat(ChatRequest::new(&messages), sink),
    )
    .await
    .expect("cancellation should end the request promptly");

    assert!(matches!(result, Err(ProviderError::Cancelled)));
}

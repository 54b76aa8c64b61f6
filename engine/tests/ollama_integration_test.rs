//! Integration tests for the Ollama provider
//!
//! These tests run against a wiremock server standing in for Ollama.
//! They do NOT require a running Ollama instance.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

use helix_engine::agent::{Conversation, Orchestrator, StopReason};
use helix_engine::config::Config;
use helix_engine::llm::{ollama::OllamaProvider, LLMError, LLMProvider, Message};
use helix_engine::registry::CapabilityRegistry;
use helix_engine::tools::{default_sources, GenomeView};

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "model": "llama3.1:8b",
        "message": {"role": "assistant", "content": content},
        "done": true
    })
}

#[tokio::test]
async fn test_generate_returns_message_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("Current application state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("chr1 is loaded")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let messages = vec![Message::system("prompt"), Message::user("what is loaded?")];

    let text = provider.generate(&messages, "Visible region: chr1:1-100").await.unwrap();
    assert_eq!(text, "chr1 is loaded");
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("missing-model"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let messages = vec![Message::user("hi")];

    let missing = OllamaProvider::new(mock_server.uri(), "missing-model");
    match missing.generate(&messages, "").await {
        Err(LLMError::NotFound(model)) => assert_eq!(model, "missing-model"),
        other => panic!("Expected NotFound, got: {:?}", other),
    }

    let limited = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    assert!(matches!(
        limited.generate(&messages, "").await,
        Err(LLMError::RateLimitExceeded)
    ));
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    let result = provider.generate(&[Message::user("hi")], "").await;
    assert!(matches!(result, Err(LLMError::ParseError(_))));
}

#[tokio::test]
async fn test_connection_error() {
    // Nothing listens on port 1
    let provider = OllamaProvider::new("http://127.0.0.1:1", "llama3.1:8b");

    let result = provider.generate(&[Message::user("Hello")], "").await;

    match result.unwrap_err() {
        LLMError::ProviderUnavailable(msg) => {
            assert!(msg.contains("Cannot connect to Ollama"));
        }
        LLMError::NetworkError(_) => {}
        other => panic!(
            "Expected ProviderUnavailable or NetworkError, got: {:?}",
            other
        ),
    }
    assert!(!provider.check_health().await);
}

#[tokio::test]
async fn test_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&mock_server)
        .await;

    let provider = OllamaProvider::new(mock_server.uri(), "llama3.1:8b");
    assert!(provider.check_health().await);
}

#[tokio::test]
async fn test_turn_over_http() {
    let mock_server = MockServer::start().await;

    let call = r#"{"tool_name": "navigate_to", "parameters": {"locus": "chr7:5000-6000"}}"#;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(call)))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_reply("Navigated to chr7:5000-6000. Task completed.")),
        )
        .mount(&mock_server)
        .await;

    let view = Arc::new(GenomeView::default());
    let registry = Arc::new(CapabilityRegistry::new(default_sources(view.clone())));
    let provider = Arc::new(OllamaProvider::new(mock_server.uri(), "llama3.1:8b"));
    let orchestrator = Orchestrator::new(provider, registry, &Config::default());

    let outcome = orchestrator
        .run_turn(&Conversation::new(), "go to chr7:5000-6000", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.model_calls, 2);
    assert_eq!(view.current().to_string(), "chr7:5000-6000");
}

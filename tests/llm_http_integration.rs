//! Integration tests for the HTTP completion client against a local mock endpoint

use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;

use nl_browser_test::executor::{Inference, InferredAction};
use nl_browser_test::llm::ChatMessage;
use nl_browser_test::{
    ActionInference, ActionKind, CompletionClient, HttpCompletionClient, LlmActionInference, LlmConfig, LlmError,
    PageSnapshot, check_health,
};

const PATH: &str = "/v1/chat/completions";

fn reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
    })
}

#[tokio::test]
async fn test_completion_round_trip() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(reply("hello"));
        })
        .await;

    let client = HttpCompletionClient::new(LlmConfig::new(server.url(PATH)).model("test-model"));
    let completion = client
        .complete(&[ChatMessage::system("be terse"), ChatMessage::user("hi")], "")
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(completion.text, "hello");
    assert_eq!(completion.usage.total, 15);
    assert_eq!(completion.usage.prompt, 12);
}

#[tokio::test]
async fn test_request_larger_than_argv_limit() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path(PATH);
            then.status(200).json_body(reply("seen"));
        })
        .await;

    // Page outline plus a screenshot, well past the 128 KiB single-argument limit
    let outline = "<button id=\"buy\">Buy</button>\n".repeat(8 * 1024);
    let screenshot = vec![0x89u8; 150 * 1024];
    let message = ChatMessage::user(outline).with_image(screenshot);

    let client = HttpCompletionClient::new(LlmConfig::new(server.url(PATH)));
    let completion = client.complete(&[message], "m").await.unwrap();

    mock.assert_async().await;
    assert_eq!(completion.text, "seen");
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(PATH);
            then.status(500).body("model crashed");
        })
        .await;

    let client = HttpCompletionClient::new(LlmConfig::new(server.url(PATH)));
    let err = client.complete(&[ChatMessage::user("hi")], "m").await.unwrap_err();

    match err {
        LlmError::Http { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("model crashed"));
        }
        other => panic!("expected an HTTP error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_action_inference_over_http() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(PATH);
            then.status(200)
                .json_body(reply(r##"{"found": true, "kind": "fill", "target": "#email", "value": "a@b.c"}"##));
        })
        .await;

    let client = Arc::new(HttpCompletionClient::new(LlmConfig::new(server.url(PATH))));
    let inference = LlmActionInference::new(client, "m").without_screenshots();
    let answer = inference
        .infer_action("Enter 'a@b.c' in the Email field", &PageSnapshot::default())
        .await
        .unwrap();

    assert_eq!(
        answer,
        Inference::Found(InferredAction {
            kind: ActionKind::Fill,
            target: "#email".to_string(),
            value: Some("a@b.c".to_string()),
        })
    );
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start_async().await;
    assert!(check_health(&server.url(PATH), 2).await.unwrap());
}

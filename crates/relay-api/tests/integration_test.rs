// Integration tests for the relay API.
// Run with: cargo test --test integration_test -- --ignored
//
// Requires a running server (DATABASE_URL + LLM_API_KEY configured) at
// RELAY_API_BASE_URL (defaults to http://localhost:9100).

use serde_json::json;
use uuid::Uuid;

fn base_url() -> String {
    std::env::var("RELAY_API_BASE_URL").unwrap_or_else(|_| "http://localhost:9100".to_string())
}

#[tokio::test]
#[ignore]
async fn test_health_endpoint() {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("failed to call health endpoint");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("failed to parse response");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
#[ignore]
async fn test_openapi_spec() {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/api-doc/openapi.json", base_url()))
        .send()
        .await
        .expect("failed to get openapi spec");

    assert_eq!(response.status(), 200);
    let spec: serde_json::Value = response.json().await.expect("failed to parse spec");
    assert_eq!(spec["info"]["title"], "Relay API");
}

#[tokio::test]
#[ignore]
async fn test_chat_missing_user_id_header_returns_400() {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat", base_url()))
        .json(&json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_chat_empty_message_returns_400() {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat", base_url()))
        .header("X-User-Id", Uuid::now_v7().to_string())
        .json(&json!({"messages": [{"role": "user", "content": "   "}]}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_chat_invalid_conversation_id_returns_400() {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat", base_url()))
        .header("X-User-Id", Uuid::now_v7().to_string())
        .json(&json!({
            "conversation_id": "not-a-uuid",
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_chat_unknown_conversation_returns_404() {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat", base_url()))
        .header("X-User-Id", Uuid::now_v7().to_string())
        .json(&json!({
            "conversation_id": Uuid::now_v7().to_string(),
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_chat_starts_a_new_conversation_stream() {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat", base_url()))
        .header("X-User-Id", Uuid::now_v7().to_string())
        .json(&json!({"messages": [{"role": "user", "content": "What's 2+2?"}]}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = response.text().await.expect("failed to read stream body");
    assert!(body.starts_with("data: "), "body: {body}");
    assert!(body.contains("\"type\":\"meta\""), "body: {body}");
    assert!(body.contains("\"type\":\"done\""), "body: {body}");
}

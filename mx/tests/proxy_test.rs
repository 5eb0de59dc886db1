//! Proxy behavior over a live socket
//!
//! These spin the real axum router on an ephemeral port, with a fake
//! local model server standing in for Ollama where needed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use modelmux::handlers::{HandlerRegistry, OllamaHandler};
use modelmux::server::router;

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Proxy wired to a given local-server base URL, routing to ollama by default
async fn spawn_proxy(ollama_base: Option<String>) -> SocketAddr {
    let registry = HandlerRegistry::with_handlers(OllamaHandler::new(ollama_base), None, "ollama/llama3.3");
    spawn(router(Arc::new(registry))).await
}

/// A stand-in local model server speaking the Ollama chat dialect
async fn spawn_fake_ollama() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Json(json!({})) }))
        .route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                Json(json!({
                    "message": { "role": "assistant", "content": "hello from local" },
                    "done_reason": "stop",
                    "prompt_eval_count": 11,
                    "eval_count": 6,
                }))
            }),
        );
    spawn(app).await
}

fn canonical_body(model: &str) -> Value {
    json!({
        "model": model,
        "system": "be brief",
        "messages": [{ "role": "user", "content": "hi" }],
        "max_tokens": 64
    })
}

#[tokio::test]
async fn test_unknown_provider_prefix_is_400() {
    let proxy = spawn_proxy(None).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/", proxy))
        .json(&canonical_body("mystery/model"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("mystery/model"));
}

#[tokio::test]
async fn test_health_unreachable_downstream_is_503() {
    let proxy = spawn_proxy(Some("http://127.0.0.1:9".to_string())).await;

    let response = reqwest::get(format!("http://{}/health", proxy)).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert!(body["reason"].as_str().is_some());
}

#[tokio::test]
async fn test_health_reachable_downstream_is_200() {
    let fake = spawn_fake_ollama().await;
    let proxy = spawn_proxy(Some(format!("http://{}", fake))).await;

    let response = reqwest::get(format!("http://{}/health", proxy)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["provider"], "ollama");
    assert_eq!(body["model"], "llama3.3");
}

#[tokio::test]
async fn test_completion_round_trip_through_local_handler() {
    let fake = spawn_fake_ollama().await;
    let proxy = spawn_proxy(Some(format!("http://{}", fake))).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/", proxy))
        .json(&canonical_body("ollama/llama3.3"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "ollama/llama3.3");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "hello from local");
    assert_eq!(body["usage"]["input_tokens"], 11);
    assert_eq!(body["usage"]["output_tokens"], 6);
}

#[tokio::test]
async fn test_completion_connection_refused_is_502_with_guidance() {
    let proxy = spawn_proxy(Some("http://127.0.0.1:9".to_string())).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/", proxy))
        .json(&canonical_body("ollama/llama3.3"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("ollama serve"));
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let proxy = spawn_proxy(None).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/", proxy))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_get_on_completion_path_is_405() {
    let proxy = spawn_proxy(None).await;

    let response = reqwest::get(format!("http://{}/anything", proxy)).await.unwrap();
    assert_eq!(response.status().as_u16(), 405);
}

#[tokio::test]
async fn test_any_post_path_routes_to_completion() {
    let fake = spawn_fake_ollama().await;
    let proxy = spawn_proxy(Some(format!("http://{}", fake))).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/v1/messages", proxy))
        .json(&canonical_body("ollama/llama3.3"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
}

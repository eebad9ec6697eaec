//! Integration tests for the HTTP chat transport.
//!
//! Each test binds an ephemeral port, streams a turn over `POST /chat` and
//! reads the body back through a consumer session.

use std::sync::Arc;

use serde_json::json;

use toolwire::frame::FinishReason;
use toolwire::invocation::session::GenerationSession;
use toolwire::invocation::InvocationStatus;
use toolwire::model::scripted::ScriptedBackend;
use toolwire::server::SESSION_HEADER;

use super::test_helpers::{call, spawn_server, test_config};

fn scripted(config: &toolwire::GlobalConfig) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::from_deltas(config.model.script.clone()))
}

// ── GET /health ─────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let config = test_config(Vec::new());
    let model = scripted(&config);
    let (base_url, ct) = spawn_server(config, model).await;

    let resp = reqwest::get(format!("{base_url}/health"))
        .await
        .expect("HTTP GET /health");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");

    ct.cancel();
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let config = test_config(Vec::new());
    let model = scripted(&config);
    let (base_url, ct) = spawn_server(config, model).await;

    let resp = reqwest::get(format!("{base_url}/nonexistent"))
        .await
        .expect("HTTP GET");
    assert_eq!(resp.status(), 404);

    ct.cancel();
}

// ── POST /chat ──────────────────────────────────────────────

#[tokio::test]
async fn chat_streams_a_tool_turn() {
    let config = test_config(vec![
        vec![
            "Checking. ".to_owned(),
            call("search", "exa", &json!({"query": "crabs"})),
        ],
        vec!["There is one result.".to_owned()],
    ]);
    let model = scripted(&config);
    let (base_url, ct) = spawn_server(config, model).await;

    let mut resp = reqwest::Client::new()
        .post(format!("{base_url}/chat"))
        .json(&json!({
            "messages": [{"role": "user", "content": "find crabs"}],
            "session_id": "chat-test-1",
        }))
        .send()
        .await
        .expect("POST /chat");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get(&SESSION_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("chat-test-1")
    );

    let mut session = GenerationSession::new();
    while let Some(chunk) = resp.chunk().await.expect("chunk") {
        session.push_chunk(&chunk).expect("push");
    }
    session.end_of_stream().expect("eos");

    let view = session.view();
    assert_eq!(view.text, "Checking. There is one result.");
    assert_eq!(view.invocations.len(), 1);
    assert_eq!(view.invocations[0].status, InvocationStatus::Completed);
    assert_eq!(view.events.len(), 1);
    assert_eq!(view.finish_reason, Some(FinishReason::Stop));

    ct.cancel();
}

#[tokio::test]
async fn chat_without_session_id_gets_a_generated_one() {
    let config = test_config(vec![vec!["hi".to_owned()]]);
    let model = scripted(&config);
    let (base_url, ct) = spawn_server(config, model).await;

    let resp = reqwest::Client::new()
        .post(format!("{base_url}/chat"))
        .json(&json!({"messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .expect("POST /chat");
    let header = resp
        .headers()
        .get(&SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .expect("session header");
    assert!(uuid::Uuid::parse_str(&header).is_ok());

    let body = resp.text().await.expect("body");
    assert!(body.ends_with("d:\"stop\"\n"), "{body}");

    ct.cancel();
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let config = test_config(Vec::new());
    let model = scripted(&config);
    let (base_url, ct) = spawn_server(config, model).await;

    let resp = reqwest::Client::new()
        .post(format!("{base_url}/chat"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .expect("POST /chat");
    assert_eq!(resp.status(), 400);

    ct.cancel();
}

//! HTTP API tests driving the router in-process

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use edgechat_core::bridge::{ChatBridge, InferenceWorker, PromptTemplate, DEFAULT_ERROR_TEXT};
use edgechat_core::config::ServerConfig;
use edgechat_core::engine::{EngineConfig, EngineLifetime, Latch, ScriptStep, ScriptedLoader};
use edgechat_core::server::{create_app, ServerState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app(steps: Vec<ScriptStep>) -> (Router, ServerState, ScriptedLoader) {
    let loader = ScriptedLoader::new(steps);
    let worker = InferenceWorker::new(
        Arc::new(loader.clone()),
        EngineConfig::builder("test.rkllm").top_k(1).build(),
        EngineLifetime::Resident,
        PromptTemplate::default(),
    )
    .unwrap();
    let bridge = ChatBridge::new(worker).with_poll_interval(Duration::from_millis(1));
    let state = ServerState::new(bridge, "test-model", ServerConfig::default());
    (create_app(state.clone()), state, loader)
}

fn chat_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn question(stream: bool) -> Value {
    json!({
        "model": "test-model",
        "messages": [{"role": "user", "content": "What is 2+2?"}],
        "stream": stream
    })
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn ndjson_lines(response: axum::response::Response) -> Vec<Value> {
    let bytes = body_bytes(response).await;
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_buffered_completion() {
    let (app, _state, _loader) = test_app(vec![ScriptStep::text("4"), ScriptStep::Finish]);

    let response = app.oneshot(chat_request("/chat", question(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "4");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_streaming_frames() {
    let (app, _state, _loader) = test_app(vec![ScriptStep::text("4"), ScriptStep::Finish]);

    let response = app
        .oneshot(chat_request("/v1/chat/completions", question(true)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let frames = ndjson_lines(response).await;
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0]["object"], "chat.completion.chunk");
    assert_eq!(frames[0]["choices"][0]["delta"]["content"], "4");
    assert!(frames[0]["choices"][0]["finish_reason"].is_null());

    assert_eq!(frames[1]["choices"][0]["finish_reason"], "stop");
    assert!(frames[1]["choices"][0]["delta"].get("content").is_none());
    assert_eq!(frames[0]["id"], frames[1]["id"]);
}

#[tokio::test]
async fn test_streaming_without_fragments_terminates() {
    let (app, _state, _loader) = test_app(vec![ScriptStep::Finish]);

    let response = app.oneshot(chat_request("/chat", question(true))).await.unwrap();
    let frames = ndjson_lines(response).await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_concurrent_request_rejected_with_503() {
    let latch = Latch::new();
    let (app, state, loader) = test_app(vec![
        ScriptStep::Hold(latch.clone()),
        ScriptStep::text("4"),
        ScriptStep::Finish,
    ]);

    let first = tokio::spawn(app.clone().oneshot(chat_request("/chat", question(false))));
    for _ in 0..500 {
        if loader.runs() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(state.bridge.gate().is_busy());

    let second = app
        .clone()
        .oneshot(chat_request("/chat", question(false)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(second).await;
    assert_eq!(body["error"]["type"], "server_busy");
    assert_eq!(loader.runs(), 1);

    latch.release();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["choices"][0]["message"]["content"], "4");
    assert_eq!(loader.runs(), 1);
    assert_eq!(loader.inits(), 1);
}

#[tokio::test]
async fn test_engine_error_reported_and_slot_released() {
    let (app, state, _loader) = test_app(vec![ScriptStep::Fail]);

    let response = app
        .clone()
        .oneshot(chat_request("/chat", question(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], DEFAULT_ERROR_TEXT);
    assert_eq!(body["choices"][0]["finish_reason"], "error");
    assert_eq!(body["usage"]["completion_tokens"], 0);
    assert!(!state.bridge.gate().is_busy());

    let next = app.oneshot(chat_request("/chat", question(true))).await.unwrap();
    assert_eq!(next.status(), StatusCode::OK);
    let frames = ndjson_lines(next).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["choices"][0]["delta"]["content"], DEFAULT_ERROR_TEXT);
    assert_eq!(frames[1]["choices"][0]["finish_reason"], "error");

    let metrics = state.get_metrics();
    assert_eq!(metrics["total_fragments"], 0);
    assert_eq!(metrics["failed_runs"], 2);
}

#[tokio::test]
async fn test_malformed_requests_rejected_with_400() {
    let (app, _state, loader) = test_app(vec![ScriptStep::Finish]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_request_error");

    let response = app
        .oneshot(chat_request(
            "/chat",
            json!({"messages": [{"role": "system", "content": "hi"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(loader.runs(), 0);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, _state, _loader) = test_app(vec![ScriptStep::text("ok"), ScriptStep::Finish]);

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health = body_json(health).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["busy"], false);

    app.clone()
        .oneshot(chat_request("/chat", question(false)))
        .await
        .unwrap();

    let metrics = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let metrics = body_json(metrics).await;
    assert_eq!(metrics["total_requests"], 1);
    assert_eq!(metrics["total_fragments"], 1);
    assert_eq!(metrics["active_requests"], 0);
}

#[tokio::test]
async fn test_models_lists_served_model_first() {
    let (app, _state, _loader) = test_app(vec![ScriptStep::Finish]);

    let response = app
        .oneshot(Request::builder().uri("/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;

    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "test-model");
    assert_eq!(body["data"][0]["active"], true);
}

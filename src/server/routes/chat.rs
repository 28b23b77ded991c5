//! Chat endpoint
//!
//! One handler serves both response modes. Buffered requests get a single
//! `chat.completion` object; streaming requests get newline-delimited
//! `chat.completion.chunk` objects, ending with a frame that carries the
//! finish reason.

use crate::api::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::bridge::{Frame, Reply, ResponseMode, RunStatus};
use crate::error::Error;
use crate::server::state::{ActiveRequest, ServerState};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content type of incremental responses
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/rkllm_chat", post(chat))
        .route("/v1/chat/completions", post(chat))
        .route("/v1/models", get(super::models::list_models))
        .route("/models", get(super::models::list_models))
        .route("/metrics", get(metrics))
}

async fn chat(
    State(state): State<ServerState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejecting malformed chat request: {}", rejection.body_text());
            return Error::MalformedRequest(rejection.body_text()).into_response();
        }
    };
    let user = match request.user_prompt() {
        Ok(user) => user.to_string(),
        Err(e) => return e.into_response(),
    };

    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    let active = ActiveRequest::new(Arc::clone(&state.metrics));

    let mode = ResponseMode::from_stream_flag(request.is_streaming());
    let model = if request.model.is_empty() {
        state.model_name.to_string()
    } else {
        request.model
    };
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();
    debug!("{} accepted ({:?}, {} bytes)", id, mode, user.len());

    match state.bridge.serve(&user, mode).await {
        Ok(Reply::Buffered(completion)) => {
            state
                .metrics
                .record_run(completion.status, completion.fragments, completion.elapsed);
            info!(
                "{} finished {:?} in {:?}",
                id, completion.status, completion.elapsed
            );
            Json(ChatCompletionResponse::from_completion(
                id, created, model, completion,
            ))
            .into_response()
        }
        Ok(Reply::Incremental(frames)) => {
            let started = Instant::now();
            let metrics = Arc::clone(&state.metrics);
            let body = async_stream::stream! {
                let _active = active;
                let mut frames = frames;
                let mut fragments = 0;
                while let Some(frame) = frames.next().await {
                    let chunk = match frame {
                        Frame::Delta(fragment) => {
                            fragments += usize::from(!fragment.notice);
                            ChatCompletionChunk::delta(&id, created, &model, fragment)
                        }
                        Frame::Done(status) => {
                            metrics.record_run(status, fragments, started.elapsed());
                            log_stream_end(&id, status, fragments);
                            ChatCompletionChunk::done(&id, created, &model, status)
                        }
                    };
                    match serde_json::to_vec(&chunk) {
                        Ok(mut line) => {
                            line.push(b'\n');
                            yield Ok::<_, serde_json::Error>(line);
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }
            };

            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                Body::from_stream(body),
            )
                .into_response()
        }
        Err(e) => {
            if matches!(e, Error::Busy) {
                state.metrics.rejected_requests.fetch_add(1, Ordering::Relaxed);
            }
            e.into_response()
        }
    }
}

fn log_stream_end(id: &str, status: RunStatus, fragments: usize) {
    match status {
        RunStatus::Error => warn!("{} stream ended with an engine error", id),
        _ => info!("{} stream finished after {} fragments", id, fragments),
    }
}

async fn metrics(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(state.get_metrics())
}

//! HTTP front end for the inference bridge
//!
//! - chat at `/chat` (aliases `/v1/chat/completions`, `/rkllm_chat`)
//! - model listing at `/models`
//! - counters at `/metrics`
//! - health at `/` and `/health`

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod middleware;
pub mod routes;
pub mod state;

pub use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let cors_config = state.config.cors.clone();
    let timeout_duration = state.config.request_timeout();

    let mut app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .merge(routes::chat::create_router())
        .layer(TimeoutLayer::new(timeout_duration))
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_config.enabled {
        app = app.layer(middleware::cors_layer(&cors_config));
    }

    app
}

/// Health check endpoint
async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "edgechat",
        "version": env!("CARGO_PKG_VERSION"),
        "model": &*state.model_name,
        "backend": state.bridge.worker().backend(),
        "busy": state.bridge.gate().is_busy(),
    }))
}

/// Serve until `shutdown` resolves, then wait for open connections to close
pub async fn start_server<F>(state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.bind_address();
    let app = create_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Starting edgechat server on {}", addr);
    info!("Chat endpoint available at http://{}/chat", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

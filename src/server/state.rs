//! Server state management

use crate::bridge::{ChatBridge, RunStatus};
use crate::catalog::ModelCatalog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::{CorsConfig, ServerConfig};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Gate, worker and memory for the single inference slot
    pub bridge: Arc<ChatBridge>,

    /// Name reported for the served model
    pub model_name: Arc<str>,

    /// Model profiles, when a catalog is configured
    pub catalog: Option<Arc<ModelCatalog>>,

    /// Directory scanned for converted models
    pub models_dir: Option<PathBuf>,

    pub config: Arc<ServerConfig>,

    pub metrics: Arc<Metrics>,
}

/// Metrics collector
#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests that passed validation
    pub total_requests: AtomicU64,

    /// Requests turned away because the slot was occupied
    pub rejected_requests: AtomicU64,

    /// Runs that ended with an error status
    pub failed_runs: AtomicU64,

    /// Fragments delivered to clients
    pub total_fragments: AtomicU64,

    /// Sum of run durations, for the average
    pub total_latency_ms: AtomicU64,

    pub completed_runs: AtomicU64,

    pub active_requests: AtomicU32,
}

impl Metrics {
    pub fn record_run(&self, status: RunStatus, fragments: usize, elapsed: Duration) {
        self.completed_runs.fetch_add(1, Ordering::Relaxed);
        self.total_fragments
            .fetch_add(fragments as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if status == RunStatus::Error {
            self.failed_runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let runs = self.completed_runs.load(Ordering::Relaxed);
        if runs == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / runs as f64
    }
}

/// RAII guard counting a request as active until dropped
pub struct ActiveRequest {
    metrics: Arc<Metrics>,
}

impl ActiveRequest {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.active_requests.fetch_add(1, Ordering::Relaxed);
        Self { metrics }
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ServerState {
    pub fn new(bridge: ChatBridge, model_name: impl Into<Arc<str>>, config: ServerConfig) -> Self {
        Self {
            bridge: Arc::new(bridge),
            model_name: model_name.into(),
            catalog: None,
            models_dir: None,
            config: Arc::new(config),
            metrics: Arc::new(Metrics::default()),
        }
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    /// Get server metrics
    pub fn get_metrics(&self) -> serde_json::Value {
        let metrics = &self.metrics;
        serde_json::json!({
            "total_requests": metrics.total_requests.load(Ordering::Relaxed),
            "rejected_requests": metrics.rejected_requests.load(Ordering::Relaxed),
            "failed_runs": metrics.failed_runs.load(Ordering::Relaxed),
            "total_fragments": metrics.total_fragments.load(Ordering::Relaxed),
            "avg_latency_ms": metrics.avg_latency_ms(),
            "active_requests": metrics.active_requests.load(Ordering::Relaxed),
            "busy": self.bridge.gate().is_busy(),
        })
    }
}

//! Server configuration with builder pattern
//!
//! Network settings, request handling and CORS for the HTTP front end.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CORS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Enable CORS middleware
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,

    /// Allowed origins; `["*"]` allows any origin
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (in seconds)
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_enabled() -> bool {
    true
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: default_cors_origins(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a whole HTTP exchange, streaming included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Interval between output channel polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Open-file limit requested at startup
    #[serde(default = "default_nofile_limit")]
    pub nofile_limit: u64,

    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_secs() -> u64 {
    600
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_nofile_limit() -> u64 {
    102400
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            nofile_limit: default_nofile_limit(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Builder for ServerConfig with chainable methods
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Start from an existing config
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn request_timeout_secs(mut self, timeout: u64) -> Self {
        self.config.request_timeout_secs = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn nofile_limit(mut self, limit: u64) -> Self {
        self.config.nofile_limit = limit;
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    pub fn cors_enabled(mut self, enabled: bool) -> Self {
        self.config.cors.enabled = enabled;
        self
    }

    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.config.cors.allowed_origins = origins;
        self
    }

    /// Load values from environment variables (merges with current config)
    pub fn from_env(mut self) -> Self {
        if let Ok(host) = std::env::var("EDGECHAT_SERVER_HOST") {
            self.config.host = host;
        }
        if let Ok(port) = std::env::var("EDGECHAT_SERVER_PORT") {
            if let Ok(p) = port.parse() {
                self.config.port = p;
            }
        }

        if let Ok(timeout) = std::env::var("EDGECHAT_REQUEST_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                self.config.request_timeout_secs = t;
            }
        }

        if let Ok(interval) = std::env::var("EDGECHAT_POLL_INTERVAL_MS") {
            if let Ok(i) = interval.parse() {
                self.config.poll_interval_ms = i;
            }
        }

        if let Ok(cors_enabled) = std::env::var("EDGECHAT_CORS_ENABLED") {
            self.config.cors.enabled = cors_enabled.to_lowercase() != "false";
        }

        if let Ok(cors_origins) = std::env::var("EDGECHAT_CORS_ORIGINS") {
            self.config.cors.allowed_origins = cors_origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

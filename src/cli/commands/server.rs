//! Server CLI command and arguments

use super::config::EngineCliArgs;
use crate::config::ServerConfigBuilder;
use clap::Args;

/// CLI arguments for server configuration
#[derive(Debug, Clone, Default, Args)]
pub struct ServerCliArgs {
    /// Server host address
    #[arg(long, env = "EDGECHAT_SERVER_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "EDGECHAT_SERVER_PORT")]
    pub port: Option<u16>,

    /// Milliseconds between output polls
    #[arg(long = "poll-interval-ms")]
    pub poll_interval_ms: Option<u64>,

    /// Disable the CORS layer
    #[arg(long = "no-cors")]
    pub no_cors: bool,
}

impl ServerCliArgs {
    /// Merge these CLI args into a ServerConfigBuilder
    pub fn apply_to_builder(&self, builder: ServerConfigBuilder) -> ServerConfigBuilder {
        let mut builder = builder;

        if let Some(ref host) = self.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(ms) = self.poll_interval_ms {
            builder = builder.poll_interval(std::time::Duration::from_millis(ms));
        }
        if self.no_cors {
            builder = builder.cors_enabled(false);
        }

        builder
    }
}

/// Serve the chat API over HTTP
#[derive(Debug, Args)]
pub struct ServerCommand {
    #[command(flatten)]
    pub server: ServerCliArgs,

    #[command(flatten)]
    pub engine: EngineCliArgs,

    /// Fold recent exchanges into every prompt
    #[arg(long)]
    pub memory: bool,
}

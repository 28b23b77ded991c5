//! edgechat binary
//!
//! Entry point for the HTTP chat server, the terminal chat and the model
//! conversion pipeline.

use anyhow::{Context as _, Result};
use clap::Parser;
use edgechat_core::cli::commands::{Commands, LoggingConfig};
use edgechat_core::cli::{handle_chat, handle_convert, handle_models, handle_serve};
use edgechat_core::config::EdgeChatConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "edgechat",
    version,
    about = "Single-slot streaming chat server for on-device NPU language models",
    long_about = None
)]
struct Cli {
    /// Path to configuration file (layered over /etc/edgechat/config.toml)
    #[arg(long, global = true, env = "EDGECHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    logging: LoggingConfig,

    #[command(subcommand)]
    command: Commands,
}

/// Console logging, or a daily-rolling file when `EDGECHAT_LOG_DIR` is set.
/// The returned guard must live as long as the process.
fn init_logging(logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::builder().parse_lossy(
        std::env::var("RUST_LOG").unwrap_or_else(|_| logging.filter_directives()),
    );

    if let Ok(log_dir) = std::env::var("EDGECHAT_LOG_DIR") {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "edgechat.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init();

        info!("File logging enabled to {}/edgechat.log", log_dir);
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = EdgeChatConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve(cmd) => handle_serve(config, cmd).await,
        Commands::Chat(cmd) => handle_chat(config, cmd).await,
        Commands::Convert(cmd) => handle_convert(config, cmd).await,
        Commands::Models(cmd) => handle_models(config, cmd).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_guard = init_logging(&cli.logging);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);

        let code = e
            .downcast_ref::<edgechat_core::Error>()
            .map_or(1, edgechat_core::Error::exit_code);
        drop(log_guard);
        std::process::exit(code);
    }
}

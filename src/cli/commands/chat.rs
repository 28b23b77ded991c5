use super::config::EngineCliArgs;
use clap::Args;

/// Chat with the model in the terminal
#[derive(Debug, Args)]
pub struct ChatCommand {
    #[command(flatten)]
    pub engine: EngineCliArgs,

    /// Treat every turn independently
    #[arg(long = "no-memory")]
    pub no_memory: bool,
}

pub mod chat;
pub mod config;
pub mod convert;
pub mod models;
pub mod server;

pub use chat::ChatCommand;
pub use config::{EngineCliArgs, LoggingConfig};
pub use convert::ConvertCommand;
pub use models::ModelsCommand;
pub use server::{ServerCliArgs, ServerCommand};

use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP chat server
    Serve(ServerCommand),
    /// Chat with the model in the terminal
    Chat(ChatCommand),
    /// Convert a model (load, build, export)
    Convert(ConvertCommand),
    /// List available models
    Models(ModelsCommand),
}

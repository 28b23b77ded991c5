//! Error types for the edgechat service.

use thiserror::Error;

/// A specialized Result type for edgechat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for edgechat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The inference slot is occupied by another run
    #[error("server is busy, try again later")]
    Busy,

    /// Request is missing required fields or is otherwise unusable
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The engine could not be initialized
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    /// The engine reported a failure while running
    #[error("engine run failed: {0}")]
    EngineRun(String),

    /// A conversion pipeline step exited with a non-zero code
    #[error("conversion step '{step}' failed with code {code}")]
    PipelineStep { step: PipelineStepKind, code: i32 },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Model catalog lookup or parse errors
    #[error("catalog error: {0}")]
    Catalog(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifies which conversion step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStepKind {
    Load,
    Build,
    Export,
}

impl std::fmt::Display for PipelineStepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStepKind::Load => "load",
            PipelineStepKind::Build => "build",
            PipelineStepKind::Export => "export",
        };
        f.write_str(name)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Exit code to hand back to the shell for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::PipelineStep { code, .. } => *code,
            _ => 1,
        }
    }
}

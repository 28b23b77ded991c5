//! edgechat: single-slot streaming chat for on-device NPU language models
//!
//! The [`bridge`] admits one inference at a time, runs it on a blocking
//! thread and relays the engine's callback output to the caller, either as
//! one completion or fragment by fragment. The [`server`] exposes it over
//! HTTP; the [`cli`] adds a terminal chat and the model conversion pipeline.

pub mod api;
pub mod bridge;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod server;

pub use bridge::{ChatBridge, Completion, Frame, ResponseMode, RunStatus};
pub use config::EdgeChatConfig;
pub use error::{Error, Result};

//! Command-line interface
//!
//! - `serve`: HTTP chat server
//! - `chat`: terminal chat
//! - `convert`: model conversion pipeline
//! - `models`: model listing

pub mod commands;
pub mod handlers;

pub use handlers::{build_bridge, handle_chat, handle_convert, handle_models, handle_serve};

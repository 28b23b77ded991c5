//! HTTP API types

pub mod openai_compat;

pub use openai_compat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ErrorResponse, ListModelsResponse, ModelInfo,
};

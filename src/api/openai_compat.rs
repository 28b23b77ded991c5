//! OpenAI-style chat wire types

use crate::bridge::{Completion, Fragment, RunStatus};
use crate::engine::TokenLogprob;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Text of the last non-empty user message
    pub fn user_prompt(&self) -> Result<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .filter_map(|m| m.content.as_deref())
            .find(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                Error::MalformedRequest("messages must contain a non-empty user message".to_string())
            })
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
        }
    }
}

/// `finish_reason` for a terminal run status
pub fn finish_reason(status: RunStatus) -> Option<String> {
    match status {
        RunStatus::Running => None,
        RunStatus::Finished => Some("stop".to_string()),
        RunStatus::Error => Some("error".to_string()),
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    pub fn from_completion(id: String, created: i64, model: String, completion: Completion) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(completion.text),
                finish_reason: finish_reason(completion.status),
            }],
            usage: Usage {
                prompt_tokens: None,
                completion_tokens: Some(completion.fragments),
                total_tokens: None,
            },
        }
    }
}

/// Chat choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Usage statistics. The runtime does not report token counts, so only the
/// number of delivered fragments is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

/// One line of an incremental response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

impl ChatCompletionChunk {
    fn new(id: &str, created: i64, model: &str, choice: StreamChoice) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// Content frame for one fragment
    pub fn delta(id: &str, created: i64, model: &str, fragment: Fragment) -> Self {
        let logprobs = if fragment.tokens.is_empty() {
            None
        } else {
            Some(fragment.tokens)
        };
        Self::new(
            id,
            created,
            model,
            StreamChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant".to_string()),
                    content: Some(fragment.text),
                },
                logprobs,
                finish_reason: None,
            },
        )
    }

    /// Terminal frame: empty delta plus the finish reason
    pub fn done(id: &str, created: i64, model: &str, status: RunStatus) -> Self {
        Self::new(
            id,
            created,
            model,
            StreamChoice {
                index: 0,
                delta: Delta::default(),
                logprobs: None,
                finish_reason: finish_reason(status),
            },
        )
    }
}

/// Streaming choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: i32,
    pub delta: Delta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogprob>>,
    pub finish_reason: Option<String>,
}

/// Delta content for streaming
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Model listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub owned_by: String,
    /// Whether this is the model being served
    pub active: bool,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, kind: &str, code: &str) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: kind.to_string(),
                code: Some(code.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_user_prompt_picks_last_user_message() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "qwen",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "What is 2+2?"}
            ]
        }))
        .unwrap();

        assert_eq!(request.user_prompt().unwrap(), "What is 2+2?");
        assert!(!request.is_streaming());
    }

    #[test]
    fn test_user_prompt_missing() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "   "}],
            "stream": true
        }))
        .unwrap();

        assert!(matches!(request.user_prompt(), Err(Error::MalformedRequest(_))));
        assert!(request.is_streaming());
    }

    #[test]
    fn test_chunk_shapes() {
        let delta = serde_json::to_value(ChatCompletionChunk::delta(
            "chatcmpl-1",
            0,
            "qwen",
            Fragment::text("4"),
        ))
        .unwrap();
        assert_eq!(delta["object"], "chat.completion.chunk");
        assert_eq!(delta["choices"][0]["delta"]["content"], "4");
        assert!(delta["choices"][0]["finish_reason"].is_null());
        assert!(delta["choices"][0].get("logprobs").is_none());

        let done = serde_json::to_value(ChatCompletionChunk::done(
            "chatcmpl-1",
            0,
            "qwen",
            RunStatus::Error,
        ))
        .unwrap();
        assert_eq!(done["choices"][0]["delta"], json!({}));
        assert_eq!(done["choices"][0]["finish_reason"], "error");
    }

    #[test]
    fn test_response_from_completion() {
        let completion = Completion {
            text: "4".to_string(),
            status: RunStatus::Finished,
            fragments: 1,
            elapsed: Duration::from_millis(3),
        };
        let response =
            ChatCompletionResponse::from_completion("chatcmpl-1".into(), 0, "qwen".into(), completion);

        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.choices[0].message.content.as_deref(), Some("4"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.completion_tokens, Some(1));
    }
}

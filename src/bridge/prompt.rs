//! Prompt templates

use serde::{Deserialize, Serialize};

/// Placeholder in the prefix replaced by the system prompt
pub const SYSTEM_PROMPT_PLACEHOLDER: &str = "{{system_prompt}}";

/// Wraps raw user text in the model's chat markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplate {
    /// Text before the first user turn; may contain `{{system_prompt}}`
    pub prefix: String,
    /// Text after each user turn, opening the assistant turn
    pub postfix: String,
    pub system_prompt: String,
    /// Separator after each remembered assistant turn
    pub turn_separator: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            prefix: "<|im_start|>system {{system_prompt}}<|im_end|> <|im_start|>user ".to_string(),
            postfix: "<|im_end|><|im_start|>assistant ".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            turn_separator: "<|im_end|><|im_start|>user ".to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(prefix: impl Into<String>, postfix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            postfix: postfix.into(),
            system_prompt: String::new(),
            turn_separator: String::new(),
        }
    }

    /// Prefix with the system prompt substituted
    pub fn interpolated_prefix(&self) -> String {
        self.prefix.replace(SYSTEM_PROMPT_PLACEHOLDER, &self.system_prompt)
    }

    /// Single-turn prompt: prefix, user text, postfix
    pub fn wrap(&self, user: &str) -> String {
        let mut prompt = self.interpolated_prefix();
        prompt.push_str(user);
        prompt.push_str(&self.postfix);
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_interpolation() {
        let template = PromptTemplate {
            prefix: "<sys>{{system_prompt}}</sys><user>".to_string(),
            postfix: "</user><bot>".to_string(),
            system_prompt: "Be brief.".to_string(),
            turn_separator: String::new(),
        };
        assert_eq!(
            template.wrap("What is 2+2?"),
            "<sys>Be brief.</sys><user>What is 2+2?</user><bot>"
        );
    }

    #[test]
    fn test_prefix_without_placeholder_is_kept() {
        let template = PromptTemplate::new("system You are a helpful assistant. user", "assistant");
        assert_eq!(
            template.wrap(" hi "),
            "system You are a helpful assistant. user hi assistant"
        );
    }
}

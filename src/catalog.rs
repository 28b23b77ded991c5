//! Model catalog
//!
//! A JSON document describing model families and models. A model inherits
//! every key from its family that it does not set itself:
//!
//! ```json
//! {
//!   "families": {
//!     "qwen": { "PROMPT_TEXT_PREFIX": "<|im_start|>system {{system_prompt}}<|im_end|> <|im_start|>user ",
//!               "PROMPT_TEXT_POSTFIX": "<|im_end|><|im_start|>assistant ", "top_k": 1 }
//!   },
//!   "models": {
//!     "qwen2.5-1.5b": { "family": "qwen", "max_context_len": 4096 }
//!   }
//! }
//! ```

use crate::bridge::PromptTemplate;
use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of converted models
pub const MODEL_EXTENSION: &str = "rkllm";

/// Settings a family or a model may carry. Unset keys fall through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(rename = "PROMPT_TEXT_PREFIX", skip_serializing_if = "Option::is_none")]
    pub prompt_text_prefix: Option<String>,
    #[serde(rename = "PROMPT_TEXT_POSTFIX", skip_serializing_if = "Option::is_none")]
    pub prompt_text_postfix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_len: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
}

impl ProfileFields {
    /// Fill every unset key from `base`
    fn inherit(mut self, base: &ProfileFields) -> Self {
        fn fill<T: Clone>(slot: &mut Option<T>, base: &Option<T>) {
            if slot.is_none() {
                *slot = base.clone();
            }
        }
        fill(&mut self.prompt_text_prefix, &base.prompt_text_prefix);
        fill(&mut self.prompt_text_postfix, &base.prompt_text_postfix);
        fill(&mut self.system_prompt, &base.system_prompt);
        fill(&mut self.max_context_len, &base.max_context_len);
        fill(&mut self.max_new_tokens, &base.max_new_tokens);
        fill(&mut self.temperature, &base.temperature);
        fill(&mut self.top_k, &base.top_k);
        fill(&mut self.top_p, &base.top_p);
        fill(&mut self.repeat_penalty, &base.repeat_penalty);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Model file, relative to the catalog's model directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub fields: ProfileFields,
}

/// A model with its family settings merged in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub name: String,
    pub family: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub fields: ProfileFields,
}

impl ModelProfile {
    /// Prompt template with the profile's keys laid over `base`
    pub fn template(&self, base: &PromptTemplate) -> PromptTemplate {
        let mut template = base.clone();
        if let Some(prefix) = &self.fields.prompt_text_prefix {
            template.prefix = prefix.clone();
        }
        if let Some(postfix) = &self.fields.prompt_text_postfix {
            template.postfix = postfix.clone();
        }
        if let Some(system_prompt) = &self.fields.system_prompt {
            template.system_prompt = system_prompt.clone();
        }
        template
    }

    /// Apply limits and sampling keys to an engine configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        let fields = &self.fields;
        if let Some(len) = fields.max_context_len {
            config.max_context_len = len;
        }
        if let Some(n) = fields.max_new_tokens {
            config.max_new_tokens = n;
        }
        if let Some(t) = fields.temperature {
            config.sampling.temperature = t;
        }
        if let Some(k) = fields.top_k {
            config.sampling.top_k = k;
        }
        if let Some(p) = fields.top_p {
            config.sampling.top_p = p;
        }
        if let Some(penalty) = fields.repeat_penalty {
            config.sampling.repeat_penalty = penalty;
        }
    }
}

/// Parsed catalog document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub families: BTreeMap<String, ProfileFields>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

impl ModelCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Catalog(format!("invalid catalog: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        debug!("Loaded model catalog from {}", path.display());
        Self::from_json(&contents)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Look up `name` and merge its family's keys into it
    pub fn resolve(&self, name: &str) -> Result<ModelProfile> {
        let entry = self
            .models
            .get(name)
            .ok_or_else(|| Error::Catalog(format!("model '{}' not found in catalog", name)))?;

        let fields = match &entry.family {
            Some(family) => {
                let base = self.families.get(family).ok_or_else(|| {
                    Error::Catalog(format!(
                        "model '{}' refers to unknown family '{}'",
                        name, family
                    ))
                })?;
                entry.fields.clone().inherit(base)
            }
            None => entry.fields.clone(),
        };

        Ok(ModelProfile {
            name: name.to_string(),
            family: entry.family.clone(),
            path: entry.path.clone(),
            fields,
        })
    }
}

/// Names of the sub-directories and `*.rkllm` files in `dir`, sorted
pub fn list_models(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        let is_model_file = path
            .extension()
            .map_or(false, |ext| ext == MODEL_EXTENSION);
        if entry.file_type()?.is_dir() || is_model_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

//! Layered configuration for edgechat
//!
//! - `EdgeChatConfig`: root configuration combining all sections
//! - `ServerConfig`: HTTP front end (network, polling, CORS)
//! - engine, prompt, memory, catalog and conversion sections
//!
//! Sources, lowest precedence first: built-in defaults,
//! `/etc/edgechat/config.toml`, a user file, then `EDGECHAT__SECTION__KEY`
//! environment variables.

pub mod server;

pub use server::{CorsConfig, ServerConfig, ServerConfigBuilder};

use crate::bridge::{PromptTemplate, DEFAULT_ERROR_TEXT, DEFAULT_MEMORY_CAPACITY};
use crate::catalog::ModelCatalog;
use crate::convert::{BuildOptions, StepCommands};
use crate::engine::{Backend, EngineConfig, EngineLifetime, SamplingParams, TargetPlatform};
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// System-wide configuration file, read when present
pub const SYSTEM_CONFIG_PATH: &str = "/etc/edgechat/config.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "EDGECHAT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeChatConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub prompt: PromptTemplate,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub convert: ConvertSettings,
}

/// Engine selection, limits and sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub backend: Backend,
    /// Converted model file on the board
    pub model_path: PathBuf,
    pub target_platform: TargetPlatform,
    /// Overrides the platform's default NPU core count
    pub npu_cores: Option<u32>,
    pub lifetime: EngineLifetime,
    pub max_context_len: u32,
    pub max_new_tokens: u32,
    pub sampling: SamplingParams,
    pub logprobs: bool,
    pub top_logprobs: u32,
    pub use_gpu: bool,
    /// Text delivered to the caller when the runtime reports an error
    pub error_text: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            model_path: PathBuf::new(),
            target_platform: TargetPlatform::Rk3588,
            npu_cores: None,
            lifetime: EngineLifetime::default(),
            max_context_len: 512,
            max_new_tokens: 256,
            sampling: SamplingParams::default(),
            logprobs: false,
            top_logprobs: 5,
            use_gpu: true,
            error_text: DEFAULT_ERROR_TEXT.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn npu_cores(&self) -> u32 {
        self.npu_cores
            .unwrap_or_else(|| self.target_platform.default_npu_cores())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::builder(self.model_path.clone())
            .max_context_len(self.max_context_len)
            .max_new_tokens(self.max_new_tokens)
            .sampling(self.sampling.clone())
            .logprobs(self.logprobs, self.top_logprobs)
            .use_gpu(self.use_gpu)
            .npu_cores(self.npu_cores())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Fold recent exchanges into HTTP prompts
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// JSON catalog of model profiles
    pub path: Option<PathBuf>,
    /// Catalog entry to serve
    pub model: Option<String>,
    /// Directory holding converted models
    pub models_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertSettings {
    pub commands: StepCommands,
    pub work_dir: PathBuf,
    pub options: BuildOptions,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            commands: StepCommands::default(),
            work_dir: PathBuf::from("./rkllm-build"),
            options: BuildOptions::default(),
        }
    }
}

/// Engine configuration and prompt template for the model being served
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub name: String,
    pub engine: EngineConfig,
    pub template: PromptTemplate,
}

impl EdgeChatConfig {
    /// Load configuration from defaults, the system file, an optional user
    /// file and the environment.
    pub fn load(user_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&EdgeChatConfig::default())?)
            .add_source(File::with_name(SYSTEM_CONFIG_PATH).required(false));

        if let Some(path) = user_file {
            debug!("Reading configuration from {}", path.display());
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load a single file without layering
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(Config::try_from(&EdgeChatConfig::default())?)
            .add_source(File::from(path.to_path_buf()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn load_catalog(&self) -> Result<Option<ModelCatalog>> {
        match &self.catalog.path {
            Some(path) => ModelCatalog::from_file(path).map(Some),
            None => Ok(None),
        }
    }

    /// Merge the selected catalog profile, if any, over the engine and
    /// prompt sections.
    pub fn resolve_model(&self) -> Result<ResolvedModel> {
        let mut engine = self.engine.engine_config();
        let mut template = self.prompt.clone();
        let mut name = model_name(&engine.model_path);

        if let Some(selected) = &self.catalog.model {
            let catalog = self.load_catalog()?.ok_or_else(|| {
                Error::Config(format!(
                    "catalog.model is '{}' but no catalog.path is set",
                    selected
                ))
            })?;
            let profile = catalog.resolve(selected)?;
            profile.apply(&mut engine);
            template = profile.template(&template);

            if engine.model_path.as_os_str().is_empty() {
                if let Some(path) = &profile.path {
                    engine.model_path = match &self.catalog.models_dir {
                        Some(dir) => dir.join(path),
                        None => path.clone(),
                    };
                }
            }
            info!("Using catalog profile '{}'", selected);
            name = selected.clone();
        }

        if self.engine.backend == Backend::Rkllm && engine.model_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "engine.model_path is required for the rkllm backend".to_string(),
            ));
        }

        Ok(ResolvedModel {
            name,
            engine,
            template,
        })
    }
}

fn model_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "echo".to_string())
}

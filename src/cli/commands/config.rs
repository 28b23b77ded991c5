//! Options shared by every subcommand

use crate::config::EdgeChatConfig;
use crate::engine::{Backend, EngineLifetime, TargetPlatform};
use clap::Args;
use std::path::PathBuf;

/// Logging flags
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingConfig {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "EDGECHAT_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log filter directives, overriding the level
    #[arg(long = "log-filter", env = "EDGECHAT_LOG_FILTER", global = true)]
    pub log_filter: Option<String>,
}

impl LoggingConfig {
    pub fn get_effective_level(&self) -> &str {
        match (self.verbose, self.log_level.as_deref()) {
            (v, _) if v >= 2 => "trace",
            (1, _) => "debug",
            (0, Some(level)) => level,
            _ => "info",
        }
    }

    /// Filter directives handed to `EnvFilter`
    pub fn filter_directives(&self) -> String {
        match &self.log_filter {
            Some(filter) => filter.clone(),
            None => {
                let level = self.get_effective_level();
                format!("edgechat={0},tower_http={0}", level)
            }
        }
    }
}

/// Engine and model selection flags
#[derive(Debug, Clone, Default, Args)]
pub struct EngineCliArgs {
    /// Inference backend (echo, rkllm)
    #[arg(long, env = "EDGECHAT_BACKEND")]
    pub backend: Option<Backend>,

    /// Absolute path of the converted model on the board
    #[arg(long = "model-path", alias = "rkllm_model_path", env = "EDGECHAT_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Target platform (rk3588, rk3576)
    #[arg(long = "target-platform", alias = "target_platform", env = "EDGECHAT_TARGET_PLATFORM")]
    pub target_platform: Option<TargetPlatform>,

    /// NPU cores to use, overriding the platform default
    #[arg(long = "npu-cores")]
    pub npu_cores: Option<u32>,

    /// Engine lifetime (resident, per-request)
    #[arg(long)]
    pub lifetime: Option<EngineLifetime>,

    /// Model catalog (JSON)
    #[arg(long, env = "EDGECHAT_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Catalog entry to serve
    #[arg(long)]
    pub model: Option<String>,

    /// System prompt substituted into the template prefix
    #[arg(long = "system-prompt")]
    pub system_prompt: Option<String>,
}

impl EngineCliArgs {
    /// Merge these CLI args over a loaded configuration
    pub fn apply_to(&self, config: &mut EdgeChatConfig) {
        if let Some(backend) = self.backend {
            config.engine.backend = backend;
        }
        if let Some(ref path) = self.model_path {
            config.engine.model_path = path.clone();
        }
        if let Some(platform) = self.target_platform {
            config.engine.target_platform = platform;
        }
        if let Some(cores) = self.npu_cores {
            config.engine.npu_cores = Some(cores);
        }
        if let Some(lifetime) = self.lifetime {
            config.engine.lifetime = lifetime;
        }
        if let Some(ref catalog) = self.catalog {
            config.catalog.path = Some(catalog.clone());
        }
        if let Some(ref model) = self.model {
            config.catalog.model = Some(model.clone());
        }
        if let Some(ref prompt) = self.system_prompt {
            config.prompt.system_prompt = prompt.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.get_effective_level(), "info");
        logging.log_level = Some("warn".to_string());
        assert_eq!(logging.get_effective_level(), "warn");
        logging.verbose = 1;
        assert_eq!(logging.get_effective_level(), "debug");
        logging.verbose = 3;
        assert_eq!(logging.filter_directives(), "edgechat=trace,tower_http=trace");
    }

    #[test]
    fn test_engine_args_override_config() {
        let mut config = EdgeChatConfig::default();
        let args = EngineCliArgs {
            target_platform: Some(TargetPlatform::Rk3576),
            model_path: Some(PathBuf::from("/data/qwen.rkllm")),
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.engine.npu_cores(), 1);
        assert_eq!(config.engine.model_path, PathBuf::from("/data/qwen.rkllm"));
        assert_eq!(config.engine.backend, Backend::Echo);
    }
}

//! Engine abstraction for on-device inference backends
//!
//! The native runtime is an opaque handle with three calls: `init`, `run` and
//! `destroy`. While `run` executes, the runtime reports progress through a
//! callback with a tri-state (token produced, run finished, run error). Here the
//! callback is a [`TokenSink`] and destruction is `Drop` on the boxed engine.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(feature = "rkllm")]
pub mod rkllm;
pub mod scripted;

pub use scripted::{Latch, ScriptStep, ScriptedLoader};

/// One sampled token and its log-probability, when the runtime reports them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub id: i32,
    pub logprob: f32,
}

/// Raw payload of a token-produced callback. The bytes may end in the middle
/// of a multi-byte character.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub bytes: Vec<u8>,
    pub tokens: Vec<TokenLogprob>,
}

impl RawOutput {
    pub fn text(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            tokens: Vec::new(),
        }
    }
}

/// Callback state reported by the engine during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A token (or a few) was produced
    Token(RawOutput),
    /// The run completed normally
    Finished,
    /// The run failed inside the runtime
    Error,
}

/// Receiver for engine callbacks. Invoked synchronously on the thread that
/// executes [`InferenceEngine::run`].
pub trait TokenSink: Send {
    fn on_event(&mut self, event: CallEvent);
}

/// An initialized engine instance (the native handle).
pub trait InferenceEngine: Send {
    /// Run one prompt to completion, reporting output through `sink`.
    fn run(&mut self, prompt: &str, sink: &mut dyn TokenSink) -> Result<()>;
}

/// Creates engine instances from an [`EngineConfig`].
pub trait EngineLoader: Send + Sync {
    fn init(&self, config: &EngineConfig) -> Result<Box<dyn InferenceEngine>>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// Which backend serves inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Scripted backend that echoes the prompt back, no hardware required
    Echo,
    /// Vendor NPU runtime (requires the `rkllm` feature)
    Rkllm,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Echo
    }
}

impl std::str::FromStr for Backend {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(Backend::Echo),
            "rkllm" => Ok(Backend::Rkllm),
            other => Err(crate::error::Error::Config(format!(
                "unknown backend '{}', expected echo or rkllm",
                other
            ))),
        }
    }
}

/// When the engine handle is created and destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineLifetime {
    /// Initialize once at startup, destroy at shutdown
    Resident,
    /// Initialize before every run, destroy right after it
    PerRequest,
}

impl Default for EngineLifetime {
    fn default() -> Self {
        EngineLifetime::Resident
    }
}

impl std::str::FromStr for EngineLifetime {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "resident" => Ok(EngineLifetime::Resident),
            "per_request" => Ok(EngineLifetime::PerRequest),
            other => Err(crate::error::Error::Config(format!(
                "unknown engine lifetime '{}', expected resident or per-request",
                other
            ))),
        }
    }
}

/// Target SoC, used to pick a default NPU core count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Rk3588,
    Rk3576,
}

impl TargetPlatform {
    pub fn default_npu_cores(self) -> u32 {
        match self {
            TargetPlatform::Rk3588 => 3,
            TargetPlatform::Rk3576 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetPlatform::Rk3588 => "rk3588",
            TargetPlatform::Rk3576 => "rk3576",
        }
    }
}

impl std::str::FromStr for TargetPlatform {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rk3588" => Ok(TargetPlatform::Rk3588),
            "rk3576" => Ok(TargetPlatform::Rk3576),
            other => Err(crate::error::Error::Config(format!(
                "unknown target platform '{}', expected rk3588 or rk3576",
                other
            ))),
        }
    }
}

/// Sampling parameters handed to the runtime at init time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub top_k: i32,
    pub top_p: f32,
    pub temperature: f32,
    pub repeat_penalty: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub mirostat: i32,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_k: 1,
            top_p: 0.9,
            temperature: 0.8,
            repeat_penalty: 1.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
        }
    }
}

/// Immutable engine configuration, fixed at engine init.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    pub max_context_len: u32,
    pub max_new_tokens: u32,
    pub sampling: SamplingParams,
    pub logprobs: bool,
    pub top_logprobs: u32,
    pub use_gpu: bool,
    pub npu_cores: u32,
}

impl EngineConfig {
    pub fn builder(model_path: impl Into<PathBuf>) -> EngineConfigBuilder {
        EngineConfigBuilder::new(model_path)
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            config: EngineConfig {
                model_path: model_path.into(),
                max_context_len: 512,
                max_new_tokens: 256,
                sampling: SamplingParams::default(),
                logprobs: false,
                top_logprobs: 5,
                use_gpu: true,
                npu_cores: TargetPlatform::Rk3588.default_npu_cores(),
            },
        }
    }

    pub fn max_context_len(mut self, len: u32) -> Self {
        self.config.max_context_len = len;
        self
    }

    pub fn max_new_tokens(mut self, n: u32) -> Self {
        self.config.max_new_tokens = n;
        self
    }

    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.config.sampling = sampling;
        self
    }

    pub fn top_k(mut self, k: i32) -> Self {
        self.config.sampling.top_k = k;
        self
    }

    pub fn logprobs(mut self, enabled: bool, top: u32) -> Self {
        self.config.logprobs = enabled;
        self.config.top_logprobs = top;
        self
    }

    pub fn use_gpu(mut self, enabled: bool) -> Self {
        self.config.use_gpu = enabled;
        self
    }

    pub fn npu_cores(mut self, cores: u32) -> Self {
        self.config.npu_cores = cores;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Select the loader for a backend.
pub fn loader_for(backend: Backend) -> Result<Box<dyn EngineLoader>> {
    match backend {
        Backend::Echo => Ok(Box::new(ScriptedLoader::echo())),
        #[cfg(feature = "rkllm")]
        Backend::Rkllm => Ok(Box::new(rkllm::RkllmLoader)),
        #[cfg(not(feature = "rkllm"))]
        Backend::Rkllm => Err(crate::error::Error::Config(
            "the rkllm backend requires building with --features rkllm".to_string(),
        )),
    }
}

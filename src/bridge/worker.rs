//! Inference worker: owns the engine handle and runs prompts off the async
//! executor

use super::channel::{ChannelWriter, OutputChannel, RunStatus, DEFAULT_ERROR_TEXT};
use super::gate::SlotPermit;
use super::memory::ConversationMemory;
use super::prompt::PromptTemplate;
use crate::engine::{EngineConfig, EngineLifetime, EngineLoader, InferenceEngine};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

enum EngineSlot {
    Resident(Arc<Mutex<Box<dyn InferenceEngine>>>),
    PerRequest,
}

/// Runs one inference at a time on a blocking thread, writing output into a
/// fresh [`OutputChannel`] per request.
pub struct InferenceWorker {
    loader: Arc<dyn EngineLoader>,
    config: Arc<EngineConfig>,
    template: PromptTemplate,
    slot: EngineSlot,
    error_text: Arc<str>,
}

impl InferenceWorker {
    /// Create the worker. With a resident lifetime the engine is initialized
    /// here and destroyed when the worker is dropped.
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        config: EngineConfig,
        lifetime: EngineLifetime,
        template: PromptTemplate,
    ) -> Result<Self> {
        let slot = match lifetime {
            EngineLifetime::Resident => {
                info!(
                    "Initializing {} engine for {}",
                    loader.backend(),
                    config.model_path.display()
                );
                let engine = loader.init(&config)?;
                EngineSlot::Resident(Arc::new(Mutex::new(engine)))
            }
            EngineLifetime::PerRequest => EngineSlot::PerRequest,
        };

        Ok(Self {
            loader,
            config: Arc::new(config),
            template,
            slot,
            error_text: Arc::from(DEFAULT_ERROR_TEXT),
        })
    }

    /// Text reported to the caller when the runtime signals an error
    pub fn with_error_text(mut self, text: impl Into<Arc<str>>) -> Self {
        self.error_text = text.into();
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        self.loader.backend()
    }

    /// Build the engine prompt for one user turn, folding in remembered
    /// exchanges when a memory is given.
    pub fn format_prompt(&self, user: &str, memory: Option<&ConversationMemory>) -> String {
        match memory {
            Some(memory) => memory.render(&self.template, user),
            None => self.template.wrap(user),
        }
    }

    /// Start a run on a blocking thread. The permit is shared by that thread
    /// and the returned handle; the slot frees once the engine has returned
    /// and the handle has been dropped, whichever comes last.
    pub fn submit(&self, prompt: String, permit: SlotPermit) -> RunHandle {
        let channel = OutputChannel::with_error_text(Arc::clone(&self.error_text));
        let writer = ChannelWriter::new(channel.clone());

        let engine = match &self.slot {
            EngineSlot::Resident(engine) => Some(Arc::clone(engine)),
            EngineSlot::PerRequest => None,
        };
        let loader = Arc::clone(&self.loader);
        let config = Arc::clone(&self.config);
        let run_channel = channel.clone();
        let permit = Arc::new(permit);
        let run_permit = Arc::clone(&permit);

        debug!("Submitting prompt ({} bytes)", prompt.len());
        let task = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let result = match engine {
                Some(engine) => engine.lock().run(&prompt, &mut writer),
                None => loader.init(&config).and_then(|mut engine| {
                    let result = engine.run(&prompt, &mut writer);
                    drop(engine);
                    result
                }),
            };

            match result {
                Ok(()) => {
                    if run_channel.finish() {
                        debug!("Engine returned without a finish callback");
                    }
                }
                Err(e) => {
                    error!("Inference failed: {}", e);
                    run_channel.fail();
                }
            }
            drop(run_permit);
        });

        RunHandle {
            channel,
            task: Some(task),
            started: Instant::now(),
            _permit: permit,
        }
    }
}

/// Handle to one in-flight run. Holding it keeps the slot occupied.
pub struct RunHandle {
    channel: OutputChannel,
    task: Option<JoinHandle<()>>,
    started: Instant,
    _permit: Arc<SlotPermit>,
}

impl RunHandle {
    pub fn channel(&self) -> &OutputChannel {
        &self.channel
    }

    /// Whether the background thread has returned
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Wait for the background thread and return the terminal status. A run
    /// that died without reporting one is marked as failed.
    pub async fn settle(&mut self) -> RunStatus {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Inference thread aborted: {}", e);
            }
        }
        if !self.channel.status().is_terminal() {
            self.channel.fail();
        }
        self.channel.status()
    }
}

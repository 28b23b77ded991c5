//! Scripted engine backend
//!
//! Replays a fixed sequence of callback events instead of running a model.
//! The `echo` flavour streams the prompt back word by word, which is handy for
//! checking prompt templates on a machine without an NPU.

use super::{CallEvent, EngineConfig, EngineLoader, InferenceEngine, RawOutput, TokenSink};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One step of a scripted run
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report raw bytes as a produced token
    Emit(Vec<u8>),
    /// Report the run as finished
    Finish,
    /// Report a runtime error
    Fail,
    /// Pause the run
    Sleep(Duration),
    /// Block until the latch is released
    Hold(Latch),
    /// Return an error from `run` without signalling through the callback
    Abort(String),
}

impl ScriptStep {
    pub fn text(s: &str) -> Self {
        ScriptStep::Emit(s.as_bytes().to_vec())
    }
}

/// One-shot release signal for holding a scripted run open.
#[derive(Debug, Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut released = lock.lock();
        while !*released {
            cvar.wait(&mut released);
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    inits: AtomicUsize,
    runs: AtomicUsize,
    destroys: AtomicUsize,
}

/// Loader producing [`ScriptedEngine`]s. Clones share counters.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    script: Option<Arc<Vec<ScriptStep>>>,
    counters: Arc<Counters>,
}

impl ScriptedLoader {
    /// Every run replays `steps`
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Some(Arc::new(steps)),
            counters: Arc::default(),
        }
    }

    /// Every run streams the prompt back word by word, then finishes
    pub fn echo() -> Self {
        Self {
            script: None,
            counters: Arc::default(),
        }
    }

    /// Number of engines initialized
    pub fn inits(&self) -> usize {
        self.counters.inits.load(Ordering::SeqCst)
    }

    /// Number of runs started across all engines
    pub fn runs(&self) -> usize {
        self.counters.runs.load(Ordering::SeqCst)
    }

    /// Number of engines destroyed
    pub fn destroys(&self) -> usize {
        self.counters.destroys.load(Ordering::SeqCst)
    }
}

impl EngineLoader for ScriptedLoader {
    fn init(&self, config: &EngineConfig) -> Result<Box<dyn InferenceEngine>> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Scripted engine init (model: {}, top_k: {})",
            config.model_path.display(),
            config.sampling.top_k
        );
        Ok(Box::new(ScriptedEngine {
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn backend(&self) -> &'static str {
        if self.script.is_some() {
            "scripted"
        } else {
            "echo"
        }
    }
}

/// Engine handle that replays a script
pub struct ScriptedEngine {
    script: Option<Arc<Vec<ScriptStep>>>,
    counters: Arc<Counters>,
}

impl InferenceEngine for ScriptedEngine {
    fn run(&mut self, prompt: &str, sink: &mut dyn TokenSink) -> Result<()> {
        self.counters.runs.fetch_add(1, Ordering::SeqCst);

        let Some(script) = &self.script else {
            for (i, word) in prompt.split_whitespace().enumerate() {
                let piece = if i == 0 { word.to_string() } else { format!(" {}", word) };
                sink.on_event(CallEvent::Token(RawOutput::text(piece)));
            }
            sink.on_event(CallEvent::Finished);
            return Ok(());
        };

        for step in script.iter() {
            match step {
                ScriptStep::Emit(bytes) => {
                    sink.on_event(CallEvent::Token(RawOutput::text(bytes.clone())))
                }
                ScriptStep::Finish => sink.on_event(CallEvent::Finished),
                ScriptStep::Fail => sink.on_event(CallEvent::Error),
                ScriptStep::Sleep(d) => std::thread::sleep(*d),
                ScriptStep::Hold(latch) => latch.wait(),
                ScriptStep::Abort(msg) => return Err(Error::EngineRun(msg.clone())),
            }
        }
        Ok(())
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.counters.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

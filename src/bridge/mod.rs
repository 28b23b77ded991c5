//! Streaming inference bridge
//!
//! Admission through a [`SingleSlotGate`], one background run per accepted
//! request through the [`InferenceWorker`], and output relayed to the caller
//! either as one [`Completion`] or as a stream of [`Frame`]s. An optional
//! [`ConversationMemory`] folds recent exchanges into each prompt.

pub mod adapter;
pub mod channel;
pub mod gate;
pub mod memory;
pub mod prompt;
pub mod utf8;
pub mod worker;

pub use adapter::{Completion, Frame, ResponseMode, DEFAULT_POLL_INTERVAL};
pub use channel::{ChannelWriter, Fragment, OutputChannel, RunStatus, DEFAULT_ERROR_TEXT};
pub use gate::{SingleSlotGate, SlotPermit};
pub use memory::{ConversationMemory, Exchange, DEFAULT_MEMORY_CAPACITY};
pub use prompt::{PromptTemplate, SYSTEM_PROMPT_PLACEHOLDER};
pub use utf8::IncrementalUtf8Decoder;
pub use worker::{InferenceWorker, RunHandle};

use crate::error::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply to one chat turn, shaped by the requested [`ResponseMode`]
pub enum Reply {
    Buffered(Completion),
    Incremental(BoxStream<'static, Frame>),
}

/// Front door for chat turns: gate, worker, optional memory and poll interval.
pub struct ChatBridge {
    gate: SingleSlotGate,
    worker: InferenceWorker,
    memory: Option<Arc<Mutex<ConversationMemory>>>,
    poll: Duration,
}

impl ChatBridge {
    pub fn new(worker: InferenceWorker) -> Self {
        Self {
            gate: SingleSlotGate::new(),
            worker,
            memory: None,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Remember up to `capacity` finished exchanges
    pub fn with_memory(mut self, capacity: usize) -> Self {
        self.memory = Some(Arc::new(Mutex::new(ConversationMemory::new(capacity))));
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn gate(&self) -> &SingleSlotGate {
        &self.gate
    }

    pub fn worker(&self) -> &InferenceWorker {
        &self.worker
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    pub fn memory_len(&self) -> Option<usize> {
        self.memory.as_ref().map(|memory| memory.lock().len())
    }

    pub fn clear_memory(&self) {
        if let Some(memory) = &self.memory {
            memory.lock().clear();
        }
    }

    /// Claim the slot and start a run for `user`. Fails with [`Error::Busy`]
    /// without waiting when another run holds the slot.
    pub fn begin(&self, user: &str) -> Result<RunHandle> {
        let permit = match self.gate.try_enter() {
            Some(permit) => permit,
            None => {
                warn!("Rejecting request: inference slot occupied");
                return Err(Error::Busy);
            }
        };

        let prompt = match &self.memory {
            Some(memory) => {
                let memory = memory.lock();
                self.worker.format_prompt(user, Some(&*memory))
            }
            None => self.worker.format_prompt(user, None),
        };
        Ok(self.worker.submit(prompt, permit))
    }

    /// Run one turn and wait for the whole completion
    pub async fn complete(&self, user: &str) -> Result<Completion> {
        let mut run = self.begin(user)?;
        let completion = adapter::collect(&mut run, self.poll).await;
        debug!(
            "Run ended {:?} after {:?} with {} fragments",
            completion.status, completion.elapsed, completion.fragments
        );

        if completion.status == RunStatus::Finished {
            self.remember(user, &completion.text);
        }
        drop(run);
        Ok(completion)
    }

    /// Run one turn, yielding fragments as they are produced
    pub fn stream(&self, user: &str) -> Result<BoxStream<'static, Frame>> {
        let run = self.begin(user)?;
        let frames = adapter::stream(run, self.poll);

        let memory = match &self.memory {
            Some(memory) => Arc::clone(memory),
            None => return Ok(frames.boxed()),
        };
        let user = user.to_string();
        let remembered = async_stream::stream! {
            let mut text = String::new();
            futures::pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                match &frame {
                    Frame::Delta(fragment) => text.push_str(&fragment.text),
                    // The inner stream still holds the run, so the slot stays
                    // taken until the exchange is recorded
                    Frame::Done(RunStatus::Finished) => {
                        memory.lock().append(user.clone(), std::mem::take(&mut text));
                    }
                    Frame::Done(_) => {}
                }
                yield frame;
            }
        };
        Ok(remembered.boxed())
    }

    pub async fn serve(&self, user: &str, mode: ResponseMode) -> Result<Reply> {
        match mode {
            ResponseMode::Buffered => self.complete(user).await.map(Reply::Buffered),
            ResponseMode::Incremental => self.stream(user).map(Reply::Incremental),
        }
    }

    fn remember(&self, user: &str, assistant: &str) {
        if let Some(memory) = &self.memory {
            memory.lock().append(user, assistant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineLifetime, Latch, ScriptStep, ScriptedLoader};

    fn bridge(loader: &ScriptedLoader) -> ChatBridge {
        let worker = InferenceWorker::new(
            Arc::new(loader.clone()),
            EngineConfig::builder("m.rkllm").build(),
            EngineLifetime::Resident,
            PromptTemplate::new("<u>", "<a>"),
        )
        .unwrap();
        ChatBridge::new(worker).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_busy_while_run_in_flight() {
        let latch = Latch::new();
        let loader = ScriptedLoader::new(vec![ScriptStep::Hold(latch.clone()), ScriptStep::Finish]);
        let bridge = bridge(&loader);

        let mut first = bridge.begin("one").unwrap();
        assert!(matches!(bridge.begin("two"), Err(Error::Busy)));

        latch.release();
        let completion = adapter::collect(&mut first, bridge.poll_interval()).await;
        assert_eq!(completion.status, RunStatus::Finished);
        assert!(matches!(bridge.begin("three"), Err(Error::Busy)));

        drop(first);
        assert!(bridge.begin("three").is_ok());
    }

    #[tokio::test]
    async fn test_memory_records_finished_runs_only() {
        let loader = ScriptedLoader::echo();
        let bridge = bridge(&loader).with_memory(2);

        bridge.complete("hello there").await.unwrap();
        assert_eq!(bridge.memory_len(), Some(1));

        let frames: Vec<Frame> = bridge.stream("again").unwrap().collect().await;
        assert_eq!(frames.last(), Some(&Frame::Done(RunStatus::Finished)));
        assert_eq!(bridge.memory_len(), Some(2));

        bridge.clear_memory();
        assert_eq!(bridge.memory_len(), Some(0));
    }

    #[tokio::test]
    async fn test_next_turn_waits_for_remembered_exchange() {
        let loader = ScriptedLoader::echo();
        let bridge = bridge(&loader).with_memory(4);

        let mut frames = bridge.stream("Q1").unwrap();
        assert!(matches!(frames.next().await, Some(Frame::Delta(_))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(loader.runs(), 1);

        // Engine has returned but the exchange is not recorded yet
        assert!(matches!(bridge.begin("Q2"), Err(Error::Busy)));
        assert_eq!(bridge.memory_len(), Some(0));

        let rest: Vec<Frame> = frames.collect().await;
        assert_eq!(rest.last(), Some(&Frame::Done(RunStatus::Finished)));
        assert_eq!(bridge.memory_len(), Some(1));

        let second = bridge.complete("Q2").await.unwrap();
        assert!(second.text.contains("Q1"));
        assert!(second.text.contains("Q2"));
    }

    #[tokio::test]
    async fn test_failed_run_not_remembered() {
        let loader = ScriptedLoader::new(vec![ScriptStep::text("x"), ScriptStep::Fail]);
        let bridge = bridge(&loader).with_memory(4);

        let completion = bridge.complete("q").await.unwrap();
        assert_eq!(completion.status, RunStatus::Error);
        assert_eq!(bridge.memory_len(), Some(0));
    }

    #[tokio::test]
    async fn test_serve_selects_mode() {
        let loader = ScriptedLoader::new(vec![ScriptStep::text("4"), ScriptStep::Finish]);
        let bridge = bridge(&loader);

        match bridge.serve("What is 2+2?", ResponseMode::Buffered).await.unwrap() {
            Reply::Buffered(completion) => assert_eq!(completion.text, "4"),
            Reply::Incremental(_) => panic!("expected buffered reply"),
        }
        match bridge.serve("What is 2+2?", ResponseMode::Incremental).await.unwrap() {
            Reply::Incremental(frames) => {
                let frames: Vec<Frame> = frames.collect().await;
                assert_eq!(frames.len(), 2);
            }
            Reply::Buffered(_) => panic!("expected incremental reply"),
        }
    }
}

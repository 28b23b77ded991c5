//! Per-request output channel between the engine callback and the responder

use super::utf8::IncrementalUtf8Decoder;
use crate::engine::{CallEvent, RawOutput, TokenLogprob, TokenSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Text appended to the channel when the runtime reports a failed run
pub const DEFAULT_ERROR_TEXT: &str = "Error occurred during LLM inference.";

/// State of one inference run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One decoded piece of output text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenLogprob>,
    /// Error text inserted by the channel rather than produced by the model
    #[serde(skip)]
    pub notice: bool,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: Vec::new(),
            notice: false,
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            notice: true,
            ..Self::text(text)
        }
    }
}

#[derive(Debug)]
struct ChannelState {
    fragments: VecDeque<Fragment>,
    status: RunStatus,
    decoder: IncrementalUtf8Decoder,
    /// Token metadata waiting for its bytes to decode
    held_tokens: Vec<TokenLogprob>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            fragments: VecDeque::new(),
            status: RunStatus::Running,
            decoder: IncrementalUtf8Decoder::new(),
            held_tokens: Vec::new(),
        }
    }

    fn drop_pending(&mut self) {
        let discarded = self.decoder.discard_pending();
        if discarded > 0 {
            warn!("Run ended with {} undecodable trailing bytes", discarded);
        }
        self.held_tokens.clear();
    }
}

/// Ordered fragment queue plus run status, shared by exactly one producer
/// (the engine callback) and one consumer (the responder).
///
/// Clones share the same queue.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    state: Arc<Mutex<ChannelState>>,
    error_text: Arc<str>,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::with_error_text(DEFAULT_ERROR_TEXT)
    }

    pub fn with_error_text(error_text: impl Into<Arc<str>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState::new())),
            error_text: error_text.into(),
        }
    }

    /// Clear fragments and pending bytes and mark the channel as running again
    pub fn reset(&self) {
        *self.state.lock() = ChannelState::new();
    }

    /// Decode and append one token payload. Ignored once the run is terminal.
    pub fn push_token(&self, raw: RawOutput) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }

        state.held_tokens.extend(raw.tokens);
        if let Some(text) = state.decoder.push(&raw.bytes) {
            let tokens = std::mem::take(&mut state.held_tokens);
            state.fragments.push_back(Fragment {
                text,
                tokens,
                notice: false,
            });
        }
    }

    /// Mark the run finished. Returns false if it was already terminal.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.drop_pending();
        state.status = RunStatus::Finished;
        true
    }

    /// Mark the run failed and append the error text. Returns false if it was
    /// already terminal.
    pub fn fail(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.drop_pending();
        state.status = RunStatus::Error;
        state.fragments.push_back(Fragment::notice(self.error_text.as_ref()));
        true
    }

    pub fn status(&self) -> RunStatus {
        self.state.lock().status
    }

    /// Take the oldest fragment
    pub fn pop(&self) -> Option<Fragment> {
        self.state.lock().fragments.pop_front()
    }

    /// Take every fragment currently queued, oldest first
    pub fn drain(&self) -> Vec<Fragment> {
        self.state.lock().fragments.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().fragments.is_empty()
    }
}

/// Callback side of the channel
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    channel: OutputChannel,
}

impl ChannelWriter {
    pub fn new(channel: OutputChannel) -> Self {
        Self { channel }
    }
}

impl TokenSink for ChannelWriter {
    fn on_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Token(raw) => self.channel.push_token(raw),
            CallEvent::Finished => {
                self.channel.finish();
            }
            CallEvent::Error => {
                if self.channel.fail() {
                    warn!("Engine reported a run error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(channel: &OutputChannel, chunks: &[&[u8]]) {
        let mut writer = ChannelWriter::new(channel.clone());
        for chunk in chunks {
            writer.on_event(CallEvent::Token(RawOutput::text(chunk.to_vec())));
        }
        writer.on_event(CallEvent::Finished);
    }

    fn joined(channel: &OutputChannel) -> String {
        channel.drain().into_iter().map(|f| f.text).collect()
    }

    #[test]
    fn test_fragments_keep_callback_order() {
        let channel = OutputChannel::new();
        let payloads: [&[u8]; 4] = [b"The", b" answer", b" is", b" 4."];
        feed(&channel, &payloads);

        assert_eq!(channel.status(), RunStatus::Finished);
        let fragments = channel.drain();
        assert_eq!(fragments.len(), 4);
        let text: String = fragments.into_iter().map(|f| f.text).collect();
        assert_eq!(text, "The answer is 4.");
    }

    #[test]
    fn test_split_multibyte_matches_unsplit() {
        let whole = "naïve café ☕";
        let unsplit = OutputChannel::new();
        feed(&unsplit, &[whole.as_bytes()]);

        let bytes = whole.as_bytes();
        let split_at = whole.find('☕').unwrap() + 1;
        let split = OutputChannel::new();
        let mut writer = ChannelWriter::new(split.clone());
        writer.on_event(CallEvent::Token(RawOutput::text(&bytes[..split_at])));
        // Only whole characters are visible before the rest arrives
        let mut text = joined(&split);
        assert_eq!(text, "naïve café ");
        writer.on_event(CallEvent::Token(RawOutput::text(&bytes[split_at..])));
        writer.on_event(CallEvent::Finished);

        text.push_str(&joined(&split));
        assert_eq!(text, joined(&unsplit));
    }

    #[test]
    fn test_error_appends_text_once() {
        let channel = OutputChannel::with_error_text("boom");
        let mut writer = ChannelWriter::new(channel.clone());
        writer.on_event(CallEvent::Error);
        writer.on_event(CallEvent::Error);
        writer.on_event(CallEvent::Finished);

        assert_eq!(channel.status(), RunStatus::Error);
        assert_eq!(channel.drain(), vec![Fragment::notice("boom")]);
    }

    #[test]
    fn test_tokens_after_terminal_are_ignored() {
        let channel = OutputChannel::new();
        assert!(channel.finish());
        channel.push_token(RawOutput::text("late"));
        assert!(channel.is_empty());
        assert!(!channel.fail());
    }

    #[test]
    fn test_token_metadata_follows_text() {
        let channel = OutputChannel::new();
        let euro = "€".as_bytes();
        channel.push_token(RawOutput {
            bytes: euro[..1].to_vec(),
            tokens: vec![TokenLogprob { id: 7, logprob: -0.5 }],
        });
        channel.push_token(RawOutput {
            bytes: euro[1..].to_vec(),
            tokens: vec![TokenLogprob { id: 8, logprob: -0.1 }],
        });

        let fragment = channel.pop().unwrap();
        assert_eq!(fragment.text, "€");
        assert_eq!(fragment.tokens.iter().map(|t| t.id).collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_reset_clears_state() {
        let channel = OutputChannel::new();
        channel.push_token(RawOutput::text("x"));
        channel.fail();
        channel.reset();
        assert_eq!(channel.status(), RunStatus::Running);
        assert!(channel.is_empty());
    }
}

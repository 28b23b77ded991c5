//! Response adapter: relays a run's output as one completion or as frames

use super::channel::{Fragment, RunStatus};
use super::worker::RunHandle;
use futures::Stream;
use std::time::Duration;

/// Default interval between channel polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How a run's output is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One aggregated completion once the run ends
    Buffered,
    /// One frame per fragment as it arrives
    Incremental,
}

impl ResponseMode {
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream {
            ResponseMode::Incremental
        } else {
            ResponseMode::Buffered
        }
    }
}

/// Aggregated output of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub status: RunStatus,
    /// Model fragments delivered; the error notice is not counted
    pub fragments: usize,
    pub elapsed: Duration,
}

/// One unit of incremental output
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A fragment, in production order
    Delta(Fragment),
    /// End of stream with the terminal status; always the last frame
    Done(RunStatus),
}

/// Poll the run until its thread returns, accumulating every fragment. The
/// caller keeps the handle, and with it the slot, until it is done with the
/// result.
pub async fn collect(run: &mut RunHandle, poll: Duration) -> Completion {
    let mut text = String::new();
    let mut fragments = 0;

    loop {
        for fragment in run.channel().drain() {
            text.push_str(&fragment.text);
            fragments += usize::from(!fragment.notice);
        }
        if run.is_finished() {
            break;
        }
        tokio::time::sleep(poll).await;
    }

    let status = run.settle().await;
    for fragment in run.channel().drain() {
        text.push_str(&fragment.text);
        fragments += usize::from(!fragment.notice);
    }

    Completion {
        text,
        status,
        fragments,
        elapsed: run.started().elapsed(),
    }
}

/// Emit each fragment as soon as it is polled, then a final [`Frame::Done`].
/// The stream ends only after the run's thread has returned and the channel
/// is empty.
pub fn stream(run: RunHandle, poll: Duration) -> impl Stream<Item = Frame> + Send {
    async_stream::stream! {
        let mut run = run;
        loop {
            while let Some(fragment) = run.channel().pop() {
                yield Frame::Delta(fragment);
            }
            if run.is_finished() {
                break;
            }
            tokio::time::sleep(poll).await;
        }

        let status = run.settle().await;
        while let Some(fragment) = run.channel().pop() {
            yield Frame::Delta(fragment);
        }
        yield Frame::Done(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::gate::SingleSlotGate;
    use crate::bridge::prompt::PromptTemplate;
    use crate::bridge::worker::InferenceWorker;
    use crate::engine::{EngineConfig, EngineLifetime, ScriptStep, ScriptedLoader};
    use futures::StreamExt;
    use std::sync::Arc;

    fn start(steps: Vec<ScriptStep>) -> RunHandle {
        let worker = InferenceWorker::new(
            Arc::new(ScriptedLoader::new(steps)),
            EngineConfig::builder("m").build(),
            EngineLifetime::PerRequest,
            PromptTemplate::new("", ""),
        )
        .unwrap();
        let gate = SingleSlotGate::new();
        worker.submit("prompt".into(), gate.try_enter().unwrap())
    }

    #[tokio::test]
    async fn test_collect_joins_fragments() {
        let mut run = start(vec![
            ScriptStep::text("Hel"),
            ScriptStep::Sleep(Duration::from_millis(15)),
            ScriptStep::text("lo"),
            ScriptStep::Finish,
        ]);
        let completion = collect(&mut run, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.fragments, 2);
        assert_eq!(completion.status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_collect_terminates_without_fragments() {
        let mut run = start(vec![ScriptStep::Sleep(Duration::from_millis(10)), ScriptStep::Finish]);
        let completion = collect(&mut run, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(completion.text, "");
        assert_eq!(completion.status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_stream_emits_in_order_then_done() {
        let run = start(vec![
            ScriptStep::text("a"),
            ScriptStep::text("b"),
            ScriptStep::Sleep(Duration::from_millis(10)),
            ScriptStep::text("c"),
            ScriptStep::Finish,
        ]);
        let frames: Vec<Frame> = stream(run, DEFAULT_POLL_INTERVAL).collect().await;
        assert_eq!(
            frames,
            vec![
                Frame::Delta(Fragment::text("a")),
                Frame::Delta(Fragment::text("b")),
                Frame::Delta(Fragment::text("c")),
                Frame::Done(RunStatus::Finished),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_terminates_without_fragments() {
        let run = start(vec![ScriptStep::Finish]);
        let frames: Vec<Frame> = stream(run, DEFAULT_POLL_INTERVAL).collect().await;
        assert_eq!(frames, vec![Frame::Done(RunStatus::Finished)]);
    }

    #[tokio::test]
    async fn test_stream_reports_error_text() {
        let run = start(vec![ScriptStep::Fail]);
        let frames: Vec<Frame> = stream(run, DEFAULT_POLL_INTERVAL).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Delta(f) if f.text.contains("Error") && f.notice));
        assert_eq!(frames[1], Frame::Done(RunStatus::Error));
    }

    #[tokio::test]
    async fn test_collect_excludes_error_notice_from_count() {
        let mut run = start(vec![ScriptStep::text("par"), ScriptStep::Fail]);
        let completion = collect(&mut run, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(completion.status, RunStatus::Error);
        assert!(completion.text.starts_with("par"));
        assert_eq!(completion.fragments, 1);
    }
}

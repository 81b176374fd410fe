//! Lifecycle observers.
//!
//! The executor never writes traces or UI events itself. It notifies the
//! registered [`ExecutionObserver`]s, in registration order, and the
//! [`IterationEmitter`] for the finer-grained per-iteration events.

use reactloop_core::event::{Emitter, Event, EventData};
use reactloop_core::message::ToolCall;
use reactloop_telemetry::DebugRecorder;
use std::sync::Arc;
use tracing::warn;

use crate::chain::ChainOutput;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::tool_step::ToolOutcome;

/// Listener for the lifecycle of one call.
pub trait ExecutionObserver: Send + Sync {
    fn on_start(&self, ctx: &ExecutionContext);

    fn on_iteration_start(&self, iteration: u32);

    fn on_iteration_end(&self, iteration: u32);

    fn on_interruption(&self, _message: &str, _iteration: u32, _prompt_source: &str) {}

    /// Called exactly once; exactly one of `output` and `error` is set.
    fn on_finish(&self, output: Option<&ChainOutput>, error: Option<&EngineError>);
}

// ── Debug trace ───────────────────────────────────────────────────────────

/// Maps the lifecycle onto a [`DebugRecorder`] and writes the trace on finish.
pub struct DebugObserver {
    recorder: Arc<DebugRecorder>,
}

impl DebugObserver {
    pub fn new(recorder: Arc<DebugRecorder>) -> Self {
        Self { recorder }
    }
}

impl ExecutionObserver for DebugObserver {
    fn on_start(&self, ctx: &ExecutionContext) {
        self.recorder.start(ctx.user_query());
    }

    fn on_iteration_start(&self, iteration: u32) {
        self.recorder.start_iteration(iteration);
    }

    fn on_iteration_end(&self, _iteration: u32) {
        self.recorder.end_iteration();
    }

    fn on_finish(&self, output: Option<&ChainOutput>, error: Option<&EngineError>) {
        let written = match (output, error) {
            (_, Some(err)) => self.recorder.finalize_with_error(&err.to_string()),
            (Some(output), None) => self.recorder.finalize(&output.result),
            (None, None) => self.recorder.finalize(""),
        };
        if let Err(e) = written {
            warn!(run_id = %self.recorder.run_id(), "Failed to write debug trace: {e}");
        }
    }
}

// ── UI events ─────────────────────────────────────────────────────────────

/// Emits `done` or `error` when the call finishes.
pub struct EmitterObserver {
    emitter: Arc<dyn Emitter>,
}

impl EmitterObserver {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self { emitter }
    }
}

impl ExecutionObserver for EmitterObserver {
    fn on_start(&self, _ctx: &ExecutionContext) {}

    fn on_iteration_start(&self, _iteration: u32) {}

    fn on_iteration_end(&self, _iteration: u32) {}

    fn on_finish(&self, output: Option<&ChainOutput>, error: Option<&EngineError>) {
        let data = match (output, error) {
            (_, Some(err)) => EventData::Error {
                message: err.to_string(),
            },
            (output, None) => EventData::Done {
                content: output.map(|o| o.result.clone()).unwrap_or_default(),
            },
        };
        self.emitter.emit(Event::new(data));
    }
}

/// Per-iteration UI events, emitted as they happen.
#[derive(Clone)]
pub struct IterationEmitter {
    emitter: Arc<dyn Emitter>,
}

impl IterationEmitter {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self { emitter }
    }

    fn emit(&self, data: EventData) {
        self.emitter.emit(Event::new(data));
    }

    pub fn thinking(&self, query: &str) {
        self.emit(EventData::Thinking {
            query: query.to_string(),
        });
    }

    pub fn thinking_chunk(&self, chunk: &str, accumulated: &str) {
        self.emit(EventData::ThinkingChunk {
            chunk: chunk.to_string(),
            accumulated: accumulated.to_string(),
        });
    }

    pub fn tool_call(&self, call: &ToolCall) {
        self.emit(EventData::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.arguments.clone(),
        });
    }

    pub fn tool_result(&self, outcome: &ToolOutcome) {
        self.emit(EventData::ToolResult {
            name: outcome.name.clone(),
            result: outcome.result.clone(),
            duration_ms: outcome.duration.as_millis() as u64,
            success: outcome.success,
        });
    }

    pub fn message(&self, content: &str) {
        self.emit(EventData::Message {
            content: content.to_string(),
        });
    }

    pub fn user_interruption(&self, message: &str, iteration: u32, prompt_source: &str) {
        self.emit(EventData::UserInterruption {
            message: message.to_string(),
            iteration,
            prompt_source: prompt_source.to_string(),
        });
    }

    pub fn error(&self, message: &str) {
        self.emit(EventData::Error {
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ExecutionSignal;
    use crate::test_helpers::CollectingEmitter;
    use reactloop_core::event::EventKind;
    use std::time::Duration;

    fn output(result: &str) -> ChainOutput {
        ChainOutput {
            result: result.into(),
            iterations: 1,
            duration: Duration::from_millis(5),
            final_state: vec![],
            debug_path: None,
            signal: ExecutionSignal::FinalAnswer,
        }
    }

    #[test]
    fn emitter_observer_sends_done_or_error() {
        let sink = Arc::new(CollectingEmitter::default());
        let observer = EmitterObserver::new(sink.clone());

        observer.on_finish(Some(&output("4")), None);
        observer.on_finish(None, Some(&EngineError::Cancelled));

        let events = sink.events();
        assert_eq!(events[0].data, EventData::Done { content: "4".into() });
        assert_eq!(events[1].kind(), EventKind::Error);
    }

    #[test]
    fn iteration_emitter_payloads() {
        let sink = Arc::new(CollectingEmitter::default());
        let emitter = IterationEmitter::new(sink.clone());

        emitter.tool_call(&ToolCall::new("c1", "get_x", "{}"));
        emitter.tool_result(&ToolOutcome {
            call_id: "c1".into(),
            name: "get_x".into(),
            args: "{}".into(),
            result: "42".into(),
            duration: Duration::from_millis(7),
            success: true,
            error: None,
        });
        emitter.user_interruption("stop", 2, "default");

        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EventKind::ToolCall, EventKind::ToolResult, EventKind::UserInterruption]
        );
        assert_eq!(
            sink.events()[1].data,
            EventData::ToolResult {
                name: "get_x".into(),
                result: "42".into(),
                duration_ms: 7,
                success: true,
            }
        );
    }

    #[test]
    fn debug_observer_writes_trace_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(DebugRecorder::new(reactloop_config::DebugConfig {
            enabled: true,
            logs_dir: dir.path().to_path_buf(),
            ..Default::default()
        }));
        let observer = DebugObserver::new(recorder.clone());

        recorder.start("q");
        observer.on_iteration_start(1);
        observer.on_finish(None, Some(&EngineError::NoAssistantMessage));

        let path = recorder.log_path().expect("trace written");
        let log = recorder.snapshot().unwrap();
        assert!(path.exists());
        assert_eq!(log.error.as_deref(), Some("no assistant message found"));
        assert_eq!(log.iterations.len(), 1);
    }
}

//! The iteration driver.
//!
//! Each iteration runs the model step, then (if the model asked for tools)
//! the tool step, and interprets their signals:
//!
//! - `FinalAnswer` / `NeedUserInput`, or an answer without tool calls, ends
//!   the loop;
//! - a step error ends the call with that error;
//! - a user interruption injects the message, activates the interruption
//!   prompt and runs one more iteration that does not count against
//!   `max_iterations`.
//!
//! Reaching `max_iterations` is not an error: the last assistant content is
//! the result.

use reactloop_config::CycleConfig;
use reactloop_core::message::{Message, Role};
use reactloop_telemetry::DebugRecorder;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, info, info_span, warn};

use crate::chain::ChainOutput;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::interruption::{interruption_notice, load_interruption_prompt};
use crate::observer::{ExecutionObserver, IterationEmitter};
use crate::signal::{ExecutionSignal, StepResult};
use crate::step::Step;

/// How one iteration ended.
enum IterationEnd {
    Continue,
    Finished(ExecutionSignal),
    Interrupted(String),
}

pub struct ReActExecutor {
    llm_step: Box<dyn Step>,
    tool_step: Box<dyn Step>,
    config: Arc<CycleConfig>,
    observers: Vec<Box<dyn ExecutionObserver>>,
    events: Option<IterationEmitter>,
    recorder: Option<Arc<DebugRecorder>>,
}

impl ReActExecutor {
    pub fn new(llm_step: Box<dyn Step>, tool_step: Box<dyn Step>, config: Arc<CycleConfig>) -> Self {
        Self {
            llm_step,
            tool_step,
            config,
            observers: Vec::new(),
            events: None,
            recorder: None,
        }
    }

    /// Observers are notified in the order they were added.
    pub fn add_observer(&mut self, observer: Box<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    pub fn with_events(mut self, events: IterationEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// The recorder whose trace path ends up in [`ChainOutput::debug_path`].
    pub fn with_recorder(mut self, recorder: Arc<DebugRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<ChainOutput, EngineError> {
        let span = info_span!("react", max_iterations = self.config.max_iterations);
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<ChainOutput, EngineError> {
        for observer in &self.observers {
            observer.on_start(ctx);
        }
        info!(query_len = ctx.user_query().len(), "ReAct loop starting");

        if let Err(e) = ctx.append(Message::user(ctx.user_query())) {
            return self.fail(e);
        }

        let max = self.config.max_iterations;
        let mut signal = ExecutionSignal::None;
        let mut iteration = 0u32;
        let mut counted = 0u32;
        let mut extra = 0u32;

        while counted < max {
            if ctx.cancel_token().is_cancelled() {
                return self.fail(EngineError::Cancelled);
            }

            iteration += 1;
            ctx.set_iteration(iteration);
            for observer in &self.observers {
                observer.on_iteration_start(iteration);
            }

            let end = match self
                .iterate(ctx)
                .instrument(debug_span!("iteration", n = iteration))
                .await
            {
                Ok(end) => end,
                Err(e) => return self.fail(e),
            };

            match end {
                IterationEnd::Finished(final_signal) => {
                    signal = final_signal;
                    self.end_iteration(iteration);
                    break;
                }
                IterationEnd::Interrupted(message) => {
                    if let Err(e) = self.handle_interruption(ctx, &message, iteration) {
                        return self.fail(e);
                    }
                    self.end_iteration(iteration);
                    // Interruptions get extra iterations, but at most `max` of them
                    if extra < max {
                        extra += 1;
                    } else {
                        counted += 1;
                    }
                }
                IterationEnd::Continue => {
                    self.end_iteration(iteration);
                    counted += 1;
                }
            }
        }

        if counted >= max && signal == ExecutionSignal::None {
            warn!(max_iterations = max, "ReAct loop reached max iterations");
        }

        self.finish(ctx, iteration, signal)
    }

    async fn iterate(&self, ctx: &ExecutionContext) -> Result<IterationEnd, EngineError> {
        // ── Model ──
        let llm = self.llm_step.execute(ctx).await;
        if llm.is_error() {
            return Err(step_error(llm, self.llm_step.name()));
        }

        let last = ctx
            .last_message()
            .filter(|m| m.role == Role::Assistant)
            .ok_or(EngineError::NoAssistantMessage)?;

        if let Some(events) = &self.events {
            if !ctx.streamed() {
                events.thinking(&last.content);
            }
            for call in &last.tool_calls {
                events.tool_call(call);
            }
        }

        if llm.signal.is_terminal() {
            return Ok(IterationEnd::Finished(llm.signal));
        }
        if !last.has_tool_calls() {
            return Ok(IterationEnd::Finished(ExecutionSignal::FinalAnswer));
        }

        // ── Tools ──
        debug!(calls = last.tool_calls.len(), "Executing tool calls");
        let tools = self.tool_step.execute(ctx).await;
        let outcomes = ctx.take_tool_results();
        if let Some(events) = &self.events {
            for outcome in &outcomes {
                events.tool_result(outcome);
            }
        }
        if tools.is_error() {
            return Err(step_error(tools, self.tool_step.name()));
        }

        // ── Interruption ──
        if tools.signal == ExecutionSignal::UserInterruption {
            return Ok(IterationEnd::Interrupted(
                tools.interruption.unwrap_or_default(),
            ));
        }
        if let Some(message) = ctx.poll_interruption() {
            return Ok(IterationEnd::Interrupted(message));
        }

        Ok(IterationEnd::Continue)
    }

    fn handle_interruption(
        &self,
        ctx: &ExecutionContext,
        message: &str,
        iteration: u32,
    ) -> Result<(), EngineError> {
        ctx.append(Message::user(interruption_notice(message)))?;

        let prompt = load_interruption_prompt(&self.config);
        info!(iteration, source = %prompt.source, "Handling user interruption");

        for observer in &self.observers {
            observer.on_interruption(message, iteration, &prompt.source);
        }
        if let Some(events) = &self.events {
            events.user_interruption(message, iteration, &prompt.source);
        }
        ctx.set_active_post_prompt(prompt.text, prompt.config);
        Ok(())
    }

    fn end_iteration(&self, iteration: u32) {
        for observer in &self.observers {
            observer.on_iteration_end(iteration);
        }
    }

    fn finish(
        &self,
        ctx: &ExecutionContext,
        iterations: u32,
        signal: ExecutionSignal,
    ) -> Result<ChainOutput, EngineError> {
        let final_state = ctx.state().history();
        let result = final_state
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Some(events) = &self.events {
            events.message(&result);
        }

        let mut output = ChainOutput {
            result,
            iterations,
            duration: ctx.elapsed(),
            final_state,
            debug_path: None,
            signal,
        };

        for observer in &self.observers {
            observer.on_finish(Some(&output), None);
        }
        output.debug_path = self.recorder.as_ref().and_then(|r| r.log_path());

        info!(
            iterations,
            signal = ?signal,
            duration_ms = output.duration.as_millis() as u64,
            "ReAct loop completed"
        );
        Ok(output)
    }

    fn fail(&self, error: EngineError) -> Result<ChainOutput, EngineError> {
        warn!(error = %error, "ReAct loop failed");
        for observer in &self.observers {
            observer.on_finish(None, Some(&error));
        }
        Err(error)
    }
}

fn step_error(result: StepResult, step: &str) -> EngineError {
    result
        .error
        .unwrap_or_else(|| EngineError::Model(format!("{step} step failed")))
}

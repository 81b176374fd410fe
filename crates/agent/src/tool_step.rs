//! Tool-invocation step.
//!
//! Runs every tool call of the latest assistant message, in order, each under
//! its own deadline, and appends one `tool` message per call. Between calls
//! it checks for a user interruption.

use async_trait::async_trait;
use reactloop_config::{ConfigError, CycleConfig, PromptConfig, TimeoutPolicy};
use reactloop_core::message::{Message, Role, ToolCall};
use reactloop_core::sanitize::clean_json_block;
use reactloop_telemetry::{DebugRecorder, ToolExecutionRecord};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::signal::StepResult;
use crate::step::Step;

/// Result of one tool call, as fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    /// Sanitized arguments
    pub args: String,
    pub result: String,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// A post-prompt ready to activate.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPrompt {
    pub text: String,
    pub config: PromptConfig,
    pub path: PathBuf,
}

/// Source of per-tool post-prompts.
pub trait PromptLoader: Send + Sync {
    /// `Ok(None)` when the tool has no enabled post-prompt.
    fn load_tool_post_prompt(&self, tool: &str) -> Result<Option<LoadedPrompt>, ConfigError>;
}

const SKIPPED_RESULT: &str = "Tool call skipped: execution was interrupted by the user.";

#[derive(Clone)]
pub struct ToolStep {
    config: Arc<CycleConfig>,
    timeout_overrides: HashMap<String, Duration>,
    recorder: Option<Arc<DebugRecorder>>,
    prompts: Option<Arc<dyn PromptLoader>>,
}

impl ToolStep {
    pub fn new(config: Arc<CycleConfig>) -> Self {
        Self {
            config,
            timeout_overrides: HashMap::new(),
            recorder: None,
            prompts: None,
        }
    }

    /// Per-tool deadlines that win over the configuration.
    pub fn with_tool_timeouts(mut self, timeouts: HashMap<String, Duration>) -> Self {
        self.timeout_overrides = timeouts;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<DebugRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_prompt_loader(mut self, loader: Arc<dyn PromptLoader>) -> Self {
        self.prompts = Some(loader);
        self
    }

    pub fn timeout_for(&self, tool: &str) -> Duration {
        self.timeout_overrides
            .get(tool)
            .copied()
            .unwrap_or_else(|| self.config.tool_timeout(tool))
    }

    /// Run one call under its deadline.
    ///
    /// The outcome is always returned. The error is set only for failures that
    /// abort the whole call: cancellation, and a timeout under
    /// [`TimeoutPolicy::Critical`]. Unknown tools and tool errors are ordinary
    /// failed results.
    pub async fn execute_tool_call(
        &self,
        ctx: &ExecutionContext,
        call: &ToolCall,
    ) -> (ToolOutcome, Option<EngineError>) {
        let started = Instant::now();
        let args = clean_json_block(&call.arguments).to_string();

        let outcome = |result: String, success: bool, error: Option<String>| ToolOutcome {
            call_id: call.id.clone(),
            name: call.name.clone(),
            args: args.clone(),
            result,
            duration: started.elapsed(),
            success,
            error,
        };

        let Some(tool) = ctx.tools().get(&call.name) else {
            warn!(tool = %call.name, "Model called an unknown tool");
            let result = outcome(
                format!("Error: tool '{}' not found", call.name),
                false,
                Some("tool not found".into()),
            );
            self.record(&result);
            return (result, None);
        };

        let timeout = self.timeout_for(&call.name);
        let run = tokio::time::timeout(timeout, tool.execute(&args));

        let finished = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => None,
            finished = run => Some(finished),
        };

        let (result, error) = match finished {
            None => (
                outcome(
                    "Tool execution was cancelled".into(),
                    false,
                    Some("cancelled".into()),
                ),
                Some(EngineError::Cancelled),
            ),
            Some(Ok(Ok(output))) => (outcome(output, true, None), None),
            Some(Ok(Err(e))) => {
                debug!(tool = %call.name, "Tool returned an error: {e}");
                (outcome(format!("Error: {e}"), false, Some(e.to_string())), None)
            }
            Some(Err(_elapsed)) => {
                warn!(tool = %call.name, timeout = ?timeout, "Tool execution timed out");
                let text = format!(
                    "Tool \"{}\" exceeded timeout of {timeout:?}. Either the tool is stuck or the API response is slow.",
                    call.name
                );
                let error = match self.config.timeout_policy {
                    TimeoutPolicy::Critical => Some(EngineError::ToolTimeout {
                        tool: call.name.clone(),
                        timeout,
                    }),
                    TimeoutPolicy::Recoverable => None,
                };
                (
                    outcome(text, false, Some(format!("timeout after {timeout:?}"))),
                    error,
                )
            }
        };

        self.record(&result);
        (result, error)
    }

    fn record(&self, outcome: &ToolOutcome) {
        if let Some(recorder) = &self.recorder {
            recorder.record_tool_execution(ToolExecutionRecord {
                name: outcome.name.clone(),
                args: outcome.args.clone(),
                result: outcome.result.clone(),
                duration_ms: outcome.duration.as_millis() as u64,
                success: outcome.success,
                error: outcome.error.clone(),
                ..Default::default()
            });
        }
    }

    fn activate_post_prompt(&self, ctx: &ExecutionContext, tool: &str) {
        let Some(loader) = &self.prompts else {
            return;
        };
        match loader.load_tool_post_prompt(tool) {
            Ok(Some(prompt)) => {
                debug!(tool = %tool, path = %prompt.path.display(), "Activated post-prompt");
                if let Some(recorder) = &self.recorder {
                    recorder.mark_post_prompt(tool, &prompt.path.display().to_string());
                }
                ctx.set_active_post_prompt(prompt.text, prompt.config);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(tool = %tool, "Failed to load post-prompt: {e}");
                if let Some(recorder) = &self.recorder {
                    recorder.add_error(&format!("post_prompt {tool}: {e}"));
                }
            }
        }
    }
}

#[async_trait]
impl Step for ToolStep {
    fn name(&self) -> &str {
        "tool_execution"
    }

    async fn execute(&self, ctx: &ExecutionContext) -> StepResult {
        let Some(last) = ctx.last_message().filter(|m| m.role == Role::Assistant) else {
            return StepResult::error(EngineError::NoAssistantMessage);
        };
        if last.tool_calls.is_empty() {
            return StepResult::continue_();
        }

        for (index, call) in last.tool_calls.iter().enumerate() {
            if let Some(text) = ctx.poll_interruption() {
                info!(iteration = ctx.iteration(), before_tool = %call.name, "User interrupted tool execution");
                // Every call still gets an answer in history
                for skipped in &last.tool_calls[index..] {
                    if let Err(e) = ctx.append(Message::tool_result(&skipped.id, SKIPPED_RESULT)) {
                        return StepResult::error(e);
                    }
                }
                return StepResult::interrupted(text);
            }

            let (outcome, error) = self.execute_tool_call(ctx, call).await;
            let appended = ctx.append(Message::tool_result(&call.id, &outcome.result));
            ctx.push_tool_result(outcome);

            if let Some(e) = error {
                return StepResult::error(e);
            }
            if let Err(e) = appended {
                return StepResult::error(e);
            }
        }

        if let [only] = last.tool_calls.as_slice() {
            self.activate_post_prompt(ctx, &only.name);
        }

        StepResult::continue_()
    }
}

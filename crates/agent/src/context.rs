//! Per-call execution context.
//!
//! Wraps one immutable [`ChainInput`] with the bookkeeping the steps share
//! during that call: iteration number, the active prompt override, and the
//! model parameters actually used. A context belongs to exactly one call.

use reactloop_config::PromptConfig;
use reactloop_core::message::{Message, Role};
use reactloop_core::models::is_vision_model_name;
use reactloop_core::state::{ARTICLE_CONTEXT_MARKER, CoreState};
use reactloop_core::tool::ToolRegistry;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::chain::ChainInput;
use crate::error::EngineError;
use crate::tool_step::ToolOutcome;

/// A prompt override activated by a tool or an interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePrompt {
    pub text: String,
    pub config: PromptConfig,
}

/// Model parameters of the latest model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedModel {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Default)]
struct ContextState {
    iteration: u32,
    active_prompt: Option<ActivePrompt>,
    resolved: ResolvedModel,
    streamed: bool,
    tool_results: Vec<ToolOutcome>,
}

pub struct ExecutionContext {
    input: ChainInput,
    started: Instant,
    inner: RwLock<ContextState>,
}

impl ExecutionContext {
    pub fn new(input: ChainInput) -> Self {
        Self {
            input,
            started: Instant::now(),
            inner: RwLock::new(ContextState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Input ─────────────────────────────────────────────────────────

    pub fn input(&self) -> &ChainInput {
        &self.input
    }

    pub fn user_query(&self) -> &str {
        &self.input.user_query
    }

    pub fn state(&self) -> &CoreState {
        &self.input.state
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.input.tools
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.input.cancel
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    // ── History ───────────────────────────────────────────────────────

    pub fn append(&self, message: Message) -> Result<(), EngineError> {
        self.input.state.append(message)?;
        Ok(())
    }

    pub fn last_message(&self) -> Option<Message> {
        self.input.state.last_message()
    }

    /// Non-blocking check for a user interruption.
    pub fn poll_interruption(&self) -> Option<String> {
        let receiver = self.input.interruptions.as_ref()?;
        let mut receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
        receiver.try_recv().ok()
    }

    // ── Bookkeeping ───────────────────────────────────────────────────

    pub fn iteration(&self) -> u32 {
        self.read().iteration
    }

    pub fn set_iteration(&self, iteration: u32) {
        self.write().iteration = iteration;
    }

    /// Replace the system prompt (and model overrides) for the next model call.
    pub fn set_active_post_prompt(&self, text: impl Into<String>, config: PromptConfig) {
        self.write().active_prompt = Some(ActivePrompt {
            text: text.into(),
            config,
        });
    }

    pub fn active_post_prompt(&self) -> Option<ActivePrompt> {
        self.read().active_prompt.clone()
    }

    pub fn clear_active_post_prompt(&self) {
        self.write().active_prompt = None;
    }

    pub fn set_resolved_model(&self, resolved: ResolvedModel) {
        self.write().resolved = resolved;
    }

    pub fn resolved_model(&self) -> ResolvedModel {
        self.read().resolved.clone()
    }

    /// Note that the latest model call streamed its reasoning.
    pub fn set_streamed(&self, streamed: bool) {
        self.write().streamed = streamed;
    }

    pub fn streamed(&self) -> bool {
        self.read().streamed
    }

    pub fn push_tool_result(&self, outcome: ToolOutcome) {
        self.write().tool_results.push(outcome);
    }

    /// Drain the tool results of the current iteration.
    pub fn take_tool_results(&self) -> Vec<ToolOutcome> {
        std::mem::take(&mut self.write().tool_results)
    }

    // ── Context assembly ──────────────────────────────────────────────

    /// Messages to send to `target_model`.
    ///
    /// Uses the active prompt override when set, else `base_prompt`. For a
    /// model that is not vision-capable (neither `vision` nor the name
    /// heuristic), images are dropped and the article-context block is cut
    /// from the system prompt.
    pub fn build_context_messages_for_model(
        &self,
        base_prompt: &str,
        target_model: &str,
        vision: bool,
    ) -> Vec<Message> {
        let prompt = match self.active_post_prompt() {
            Some(active) => active.text,
            None => base_prompt.to_string(),
        };
        let mut messages = self.input.state.build_context(&prompt);

        if vision || is_vision_model_name(target_model) {
            return messages;
        }

        for message in &mut messages {
            message.images.clear();
        }
        if let Some(system) = messages.first_mut().filter(|m| m.role == Role::System) {
            system.content = strip_article_context(&system.content);
        }
        messages
    }
}

/// Remove the article-context block: everything from the line holding the
/// marker on, plus up to two trailing newlines before it.
fn strip_article_context(content: &str) -> String {
    let Some(marker) = content.find(ARTICLE_CONTEXT_MARKER) else {
        return content.to_string();
    };
    let Some(line_start) = content[..marker].rfind('\n') else {
        return String::new();
    };
    let mut kept = &content[..line_start];
    for _ in 0..2 {
        kept = kept.strip_suffix('\n').unwrap_or(kept);
    }
    kept.to_string()
}

//! User interruption handling.
//!
//! An interruption never aborts a call: the message is appended to history
//! and the interruption-handler prompt becomes the override for the next
//! model call.

use reactloop_config::{CycleConfig, PromptConfig, PromptFile};
use tracing::{debug, warn};

/// Prompt used when no interruption prompt file is configured or usable.
pub const DEFAULT_INTERRUPTION_PROMPT: &str = "You are an INTERRUPTION HANDLER for an AI agent.

The user has interrupted execution with a message. Your task:
1. Acknowledge the interruption
2. Address the user's concern
3. Decide whether to continue or stop execution

If user mentions \"todo\" or \"plan\", use these operations:
- \"todo: add <task>\" or \"plan: add <task>\" → Call plan_add_task
- \"todo: complete <N>\" or \"plan: done <N>\" → Call plan_mark_done
- \"todo: fail <N> <reason>\" or \"plan: fail <N> <reason>\" → Call plan_mark_failed
- \"todo: show\" or \"plan: show\" → Include current todo list in response
- \"todo: clear\" or \"plan: clear\" → Call plan_clear

Always respond in plain text. Be concise.";

/// The prompt to activate after an interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptionPrompt {
    pub text: String,
    pub config: PromptConfig,
    /// "default" or "file:<path>"
    pub source: String,
}

impl InterruptionPrompt {
    fn builtin() -> Self {
        Self {
            text: DEFAULT_INTERRUPTION_PROMPT.to_string(),
            config: PromptConfig::default(),
            source: "default".to_string(),
        }
    }
}

/// Load the configured interruption prompt, falling back to the built-in one
/// when the file is unset, missing, unparseable or has no messages.
pub fn load_interruption_prompt(config: &CycleConfig) -> InterruptionPrompt {
    let Some(path) = config.interruption_prompt_path() else {
        return InterruptionPrompt::builtin();
    };

    let file = match PromptFile::load(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), "Interruption prompt unusable, using default: {e}");
            return InterruptionPrompt::builtin();
        }
    };

    let Some(first) = file.messages.first() else {
        debug!(path = %path.display(), "Interruption prompt has no messages, using default");
        return InterruptionPrompt::builtin();
    };

    InterruptionPrompt {
        text: first.content.clone(),
        config: file.config,
        source: format!("file:{}", path.display()),
    }
}

/// The user message recorded in history for an interruption.
pub fn interruption_notice(message: &str) -> String {
    format!("[USER INTERRUPTION] {message}")
}

//! Typed control flow between steps and the executor.
//!
//! A step returns a [`StepResult`]: the [`NextAction`] tells the executor
//! what to do, the [`ExecutionSignal`] tells it why.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Content the model returns when it needs the user to choose.
///
/// Kept for compatibility with prompts that predate typed signals.
pub const USER_CHOICE_REQUIRED: &str = "__USER_CHOICE_REQUIRED__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    Break,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSignal {
    #[default]
    None,
    FinalAnswer,
    NeedUserInput,
    Error,
    UserInterruption,
}

impl ExecutionSignal {
    /// Signals that end the loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FinalAnswer | Self::NeedUserInput | Self::Error)
    }
}

/// Uniform result of a step.
///
/// Built only through the constructors, so `Break` and `Error` always carry a
/// signal other than `None`.
#[derive(Debug)]
pub struct StepResult {
    pub action: NextAction,
    pub signal: ExecutionSignal,
    pub error: Option<EngineError>,
    /// Text of a user interruption (with `ExecutionSignal::UserInterruption`)
    pub interruption: Option<String>,
}

impl StepResult {
    pub fn continue_() -> Self {
        Self {
            action: NextAction::Continue,
            signal: ExecutionSignal::None,
            error: None,
            interruption: None,
        }
    }

    /// Stop the loop. A `None` signal is promoted to `FinalAnswer`.
    pub fn finish(signal: ExecutionSignal) -> Self {
        let signal = match signal {
            ExecutionSignal::None => ExecutionSignal::FinalAnswer,
            other => other,
        };
        Self {
            action: NextAction::Break,
            signal,
            error: None,
            interruption: None,
        }
    }

    pub fn error(error: EngineError) -> Self {
        Self {
            action: NextAction::Error,
            signal: ExecutionSignal::Error,
            error: Some(error),
            interruption: None,
        }
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self {
            action: NextAction::Break,
            signal: ExecutionSignal::UserInterruption,
            error: None,
            interruption: Some(message.into()),
        }
    }

    /// The signal a model answer without tool calls produces.
    pub fn for_final_content(content: &str) -> Self {
        if content == USER_CHOICE_REQUIRED {
            Self::finish(ExecutionSignal::NeedUserInput)
        } else {
            Self::finish(ExecutionSignal::FinalAnswer)
        }
    }

    pub fn is_error(&self) -> bool {
        self.action == NextAction::Error || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_never_carries_none() {
        let result = StepResult::finish(ExecutionSignal::None);
        assert_eq!(result.action, NextAction::Break);
        assert_eq!(result.signal, ExecutionSignal::FinalAnswer);

        let err = StepResult::error(EngineError::NoAssistantMessage);
        assert_eq!(err.signal, ExecutionSignal::Error);
        assert!(err.is_error());
    }

    #[test]
    fn user_choice_marker() {
        assert_eq!(
            StepResult::for_final_content(USER_CHOICE_REQUIRED).signal,
            ExecutionSignal::NeedUserInput
        );
        assert_eq!(
            StepResult::for_final_content("4").signal,
            ExecutionSignal::FinalAnswer
        );
    }

    #[test]
    fn interruption_carries_text() {
        let result = StepResult::interrupted("stop please");
        assert_eq!(result.signal, ExecutionSignal::UserInterruption);
        assert_eq!(result.interruption.as_deref(), Some("stop please"));
        assert!(!result.signal.is_terminal());
    }
}

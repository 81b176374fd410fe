//! Engine error types.

use reactloop_config::ConfigError;
use reactloop_core::error::{ProviderError, StateError};
use std::time::Duration;

/// Everything that can abort an engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model registry is not set")]
    MissingModelRegistry,

    #[error("default model is not set")]
    MissingDefaultModel,

    #[error("tool registry is not set")]
    MissingToolRegistry,

    #[error("conversation state is not set")]
    MissingState,

    #[error("LLM generation failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("model error: {0}")]
    Model(String),

    #[error("tool '{tool}' timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("model called bundle '{0}' again after expansion")]
    NestedBundleCall(String),

    #[error("no assistant message found")]
    NoAssistantMessage,

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Errors raised before the loop starts.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::MissingModelRegistry
                | Self::MissingDefaultModel
                | Self::MissingToolRegistry
                | Self::MissingState
        )
    }
}

//! Error types for the ReactLoop domain.
//!
//! Each collaborator boundary (provider, tool, state store) has its own
//! `thiserror` enum; the engine wraps them in its own error type.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Errors from the conversation state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key is reserved: {0}")]
    KeyReserved(String),

    #[error("invalid type for key '{key}': expected {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("file not found in working memory: [{tag}] {filename}")]
    FileNotFound { tag: String, filename: String },

    #[error("task {0} not found")]
    TaskNotFound(usize),

    #[error("task {0} is already done or failed")]
    TaskAlreadyClosed(usize),
}

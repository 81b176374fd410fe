//! Per-run debug traces and log initialisation for ReactLoop.
//!
//! The [`DebugRecorder`] captures every model request/response and tool
//! execution of one engine call and writes the whole trace as a single JSON
//! document. [`logging::init`] installs the process-wide `tracing` subscriber.

pub mod logging;
pub mod model;
pub mod recorder;

pub use model::{
    DebugIteration, DebugLog, DebugSummary, LlmRequestRecord, LlmResponseRecord, ToolCallRecord,
    ToolExecutionRecord,
};
pub use recorder::DebugRecorder;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("trace was never started")]
    NotStarted,

    #[error("failed to write trace to {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

//! UI-facing events emitted while a call runs.
//!
//! The engine never talks to a terminal or a socket directly: it hands
//! [`Event`]s to an [`Emitter`]. The stock emitter is the broadcast-based
//! [`EventBus`], which any number of consumers can subscribe to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// The closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thinking,
    ThinkingChunk,
    ToolCall,
    ToolResult,
    UserInterruption,
    Message,
    Error,
    Done,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Thinking => "thinking",
            Self::ThinkingChunk => "thinking_chunk",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::UserInterruption => "user_interruption",
            Self::Message => "message",
            Self::Error => "error",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    /// The model is working on the query.
    Thinking { query: String },

    /// Streamed reasoning: the increment and the accumulated text.
    ThinkingChunk { chunk: String, accumulated: String },

    /// The agent is calling a tool.
    ToolCall { id: String, name: String, args: String },

    /// A tool finished.
    ToolResult {
        name: String,
        result: String,
        duration_ms: u64,
        success: bool,
    },

    /// The user interrupted the run.
    UserInterruption {
        message: String,
        iteration: u32,
        prompt_source: String,
    },

    /// The final answer text.
    Message { content: String },

    /// The run (or a stream) failed.
    Error { message: String },

    /// The run completed.
    Done { content: String },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Thinking { .. } => EventKind::Thinking,
            Self::ThinkingChunk { .. } => EventKind::ThinkingChunk,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::ToolResult { .. } => EventKind::ToolResult,
            Self::UserInterruption { .. } => EventKind::UserInterruption,
            Self::Message { .. } => EventKind::Message,
            Self::Error { .. } => EventKind::Error,
            Self::Done { .. } => EventKind::Done,
        }
    }
}

/// A timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(data: EventData) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

/// A sink for UI events.
///
/// `emit` must not block: implementations drop events rather than wait.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: Event);
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream` (lagging consumers see `Err` items).
    pub fn stream(&self) -> BroadcastStream<Arc<Event>> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Emitter for EventBus {
    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }
}

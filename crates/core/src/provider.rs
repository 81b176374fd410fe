//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a message list to an LLM and get the
//! assistant's reply back, either in one piece or as a stream of chunks.
//!
//! Concrete HTTP clients live outside the engine; tests use scripted providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Generation parameters resolved for a single model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Provider-side model identifier
    pub model: String,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate (0 = provider default)
    pub max_tokens: u32,

    /// Response format, e.g. "json_object" (empty = plain text)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Whether the model may request several tools at once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// What a streamed chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Reasoning content from a thinking-mode model
    Thinking,
    /// Regular answer content
    Content,
    /// The stream failed
    Error,
    /// The stream finished
    Done,
}

/// A single chunk in a streaming response.
///
/// Carries both the increment (`delta`) and the accumulated text so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub kind: ChunkKind,

    /// Accumulated answer content
    #[serde(default)]
    pub content: String,

    /// Accumulated reasoning content
    #[serde(default)]
    pub reasoning_content: String,

    /// The increment carried by this chunk
    #[serde(default)]
    pub delta: String,

    #[serde(default)]
    pub done: bool,

    /// Error description (only for `ChunkKind::Error`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// A final chunk wrapping a complete message.
    pub fn done(message: &Message) -> Self {
        Self {
            kind: ChunkKind::Done,
            content: message.content.clone(),
            reasoning_content: String::new(),
            delta: String::new(),
            done: true,
            error: None,
        }
    }
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The engine calls `generate()` or
/// `generate_stream()` without knowing which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "zai").
    fn name(&self) -> &str;

    /// Send the messages and get the complete assistant message.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> std::result::Result<Message, ProviderError>;

    /// Whether `generate_stream` produces real incremental chunks.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream the answer, invoking `on_chunk` for each chunk, and return the
    /// final message.
    ///
    /// Default implementation calls `generate()` and reports one `Done` chunk.
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        on_chunk: &(dyn Fn(StreamChunk) + Send + Sync),
    ) -> std::result::Result<Message, ProviderError> {
        let message = self.generate(messages, options).await?;
        on_chunk(StreamChunk::done(&message));
        Ok(message)
    }
}

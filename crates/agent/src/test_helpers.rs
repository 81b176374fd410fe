//! Shared test helpers: scripted providers, stub tools, an event collector.

use async_trait::async_trait;
use reactloop_core::error::{ProviderError, ToolError};
use reactloop_core::event::{Emitter, Event};
use reactloop_core::message::{Message, ToolCall};
use reactloop_core::provider::{ChunkKind, GenerateOptions, Provider, StreamChunk};
use reactloop_core::tool::Tool;
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call returns the next response in the queue; once the queue is
/// exhausted, calls fail (or repeat the last response, see [`Self::repeating`]).
pub struct SequentialMockProvider {
    responses: Vec<Message>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<(Vec<Message>, GenerateOptions)>>,
    repeat_last: bool,
    streaming: bool,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
            streaming: false,
        }
    }

    /// A provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Message::assistant(text)])
    }

    /// A provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<ToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls, thought),
            Message::assistant(answer),
        ])
    }

    /// Keep returning the last response once the script runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Stream each word of the content as a thinking chunk.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received: messages and options.
    pub fn requests(&self) -> Vec<(Vec<Message>, GenerateOptions)> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, messages: &[Message], options: &GenerateOptions) -> Result<Message, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));

        let mut count = self.call_count.lock().unwrap();
        let index = *count;
        *count += 1;

        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None if self.repeat_last && !self.responses.is_empty() => {
                Ok(self.responses[self.responses.len() - 1].clone())
            }
            None => Err(ProviderError::NotConfigured(format!(
                "SequentialMockProvider: no more responses (call #{index}, have {})",
                self.responses.len()
            ))),
        }
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Message, ProviderError> {
        self.next(messages, options)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        on_chunk: &(dyn Fn(StreamChunk) + Send + Sync),
    ) -> Result<Message, ProviderError> {
        let message = self.next(messages, options)?;
        let mut accumulated = String::new();
        for word in message.content.split_whitespace() {
            accumulated.push_str(word);
            on_chunk(StreamChunk {
                kind: ChunkKind::Thinking,
                content: String::new(),
                reasoning_content: accumulated.clone(),
                delta: word.to_string(),
                done: false,
                error: None,
            });
        }
        on_chunk(StreamChunk::done(&message));
        Ok(message)
    }
}

/// An assistant message with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<ToolCall>, thought: &str) -> Message {
    Message::assistant(thought).with_tool_calls(tool_calls)
}

/// A tool call with id `call_<name>`.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(format!("call_{name}"), name, args.to_string())
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// Returns its arguments unchanged.
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes its arguments"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, arguments: &str) -> Result<String, ToolError> {
        Ok(arguments.to_string())
    }
}

/// Always fails.
pub struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail_tool"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: &str) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail_tool".into(),
            reason: "upstream returned 500".into(),
        })
    }
}

/// Sleeps before answering.
pub struct SleepTool {
    name: String,
    delay: Duration,
}

impl SleepTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Sleeps, then answers"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: &str) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok("done".into())
    }
}

/// Keeps every emitted event.
#[derive(Default)]
pub struct CollectingEmitter {
    events: Mutex<Vec<Event>>,
}

impl CollectingEmitter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Emitter for CollectingEmitter {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

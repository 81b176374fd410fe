//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactloop_agent::ReActCycle;
use reactloop_config::CycleConfig;
use reactloop_core::error::{ProviderError, ToolError};
use reactloop_core::event::{Emitter, Event, EventKind};
use reactloop_core::message::{Message, ToolCall};
use reactloop_core::models::{ModelDef, ModelRegistry};
use reactloop_core::provider::{GenerateOptions, Provider};
use reactloop_core::state::CoreState;
use reactloop_core::tool::{Tool, ToolRegistry};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted responses in sequence, recording every request.
pub struct ScriptedProvider {
    responses: Vec<Message>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<Vec<Message>>>,
    repeat_last: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    pub fn text(answer: &str) -> Self {
        Self::new(vec![Message::assistant(answer)])
    }

    pub fn tool_then_text(calls: Vec<ToolCall>, answer: &str) -> Self {
        Self::new(vec![tool_response(calls, ""), Message::assistant(answer)])
    }

    /// Keep answering with the last response.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<Message, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let mut count = self.call_count.lock().unwrap();
        let index = *count;
        *count += 1;
        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None if self.repeat_last => Ok(self.responses.last().cloned().unwrap()),
            None => Err(ProviderError::NotConfigured(format!(
                "ScriptedProvider exhausted: call #{index}, have {}",
                self.responses.len()
            ))),
        }
    }
}

pub fn tool_response(calls: Vec<ToolCall>, thought: &str) -> Message {
    Message::assistant(thought).with_tool_calls(calls)
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(format!("call_{name}"), name, args.to_string())
}

// ── Tools ────────────────────────────────────────────────────────────────

/// Answers with a fixed value after an optional delay.
pub struct LookupTool {
    name: String,
    answer: String,
    delay: Duration,
}

impl LookupTool {
    pub fn new(name: &str, answer: &str) -> Self {
        Self {
            name: name.into(),
            answer: answer.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(name: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(name, "late")
        }
    }
}

#[async_trait::async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Looks a value up"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"key": {"type": "string"}}
        })
    }

    async fn execute(&self, _arguments: &str) -> Result<String, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answer.clone())
    }
}

// ── Events ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CollectingEmitter {
    events: Mutex<Vec<Event>>,
}

impl CollectingEmitter {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(Event::kind).collect()
    }
}

impl Emitter for CollectingEmitter {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

// ── Cycle ────────────────────────────────────────────────────────────────

pub fn registry_with(provider: Arc<dyn Provider>) -> Arc<ModelRegistry> {
    let models = ModelRegistry::new();
    models
        .register("default", ModelDef::new("mock-model"), provider)
        .unwrap();
    Arc::new(models)
}

pub fn tools(list: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in list {
        registry.register(tool);
    }
    Arc::new(registry)
}

/// A fully wired cycle with its own state.
pub fn cycle(
    config: CycleConfig,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
) -> ReActCycle {
    let mut cycle = ReActCycle::new(config);
    cycle.set_model_registry(registry_with(provider));
    cycle.set_default_model("default");
    cycle.set_tool_registry(tools);
    cycle.set_state(Arc::new(CoreState::new()));
    cycle.set_streaming(false);
    cycle
}

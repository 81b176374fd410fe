//! Data model for debug traces.
//!
//! One [`DebugLog`] per engine call; serialized as pretty JSON.

use chrono::{DateTime, Utc};
use reactloop_core::message::{Message, ToolCall};
use reactloop_core::provider::ToolDefinition;
use serde::{Deserialize, Serialize};

// ── Model exchange ────────────────────────────────────────────────────────

/// The outgoing request of one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequestRecord {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    /// "default" or "post_prompt"
    pub system_prompt_used: String,
    pub messages_count: usize,
    /// Full payload, only with full LLM logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Set on the repeated call made after a bundle expansion
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bundle_reinvocation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: String,
}

impl From<&ToolCall> for ToolCallRecord {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.arguments.clone(),
        }
    }
}

/// The model's answer to one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponseRecord {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default)]
    pub result_truncated: bool,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Path of the post-prompt this execution activated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_prompt_activated: Option<String>,
}

// ── Iterations and the log ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugIteration {
    pub iteration: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_request: Option<LlmRequestRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<LlmResponseRecord>,
    #[serde(default)]
    pub tools_executed: Vec<ToolExecutionRecord>,
    #[serde(default)]
    pub is_final: bool,
}

/// Aggregate counters across the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugSummary {
    pub total_llm_calls: usize,
    pub total_tools_executed: usize,
    pub total_llm_duration_ms: u64,
    pub total_tool_duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Distinct tool names, in first-use order
    #[serde(default)]
    pub visited_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugLog {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub duration_ms: u64,
    pub iterations: Vec<DebugIteration>,
    pub summary: DebugSummary,
    #[serde(default)]
    pub final_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DebugLog {
    pub fn new(run_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            user_query: user_query.into(),
            duration_ms: 0,
            iterations: Vec::new(),
            summary: DebugSummary::default(),
            final_result: String::new(),
            error: None,
        }
    }
}

//! Configuration loading, validation, and management for ReactLoop.
//!
//! Loads configuration from `reactloop.toml` (or the path in
//! `REACTLOOP_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

pub mod prompt;

use reactloop_core::models::ModelDef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use prompt::{PromptConfig, PromptFile, PromptMessage, load_prompt_text};

/// Base system prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to tools.

When you need to use a tool, respond with a function call in the following format:
{
  \"name\": \"tool_name\",
  \"arguments\": {\"param1\": \"value1\"}
}

After receiving tool results, analyze them and determine if you need more information or can provide a final answer.
Be concise and helpful in your responses.";

/// Tools that wait on a human get a longer default deadline.
pub const ASK_USER_TOOL: &str = "ask_user_question";
const ASK_USER_TIMEOUT_SECS: u64 = 300;

/// The root configuration structure.
///
/// Maps directly to `reactloop.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when a call does not request one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Registered models, by name
    #[serde(default)]
    pub models: HashMap<String, ModelDef>,

    /// Engine (ReAct cycle) configuration
    #[serde(default)]
    pub chain: CycleConfig,

    /// Per-run debug traces
    #[serde(default)]
    pub debug: DebugConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_model() -> String {
    "default".into()
}

/// How tool definitions are disclosed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolResolutionMode {
    /// Every tool definition is always visible.
    #[default]
    Flat,
    /// Only bundle summaries are visible until a bundle is called.
    BundleFirst,
}

/// What a tool deadline does to the running call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// A timed-out tool aborts the call.
    #[default]
    Critical,
    /// A timed-out tool becomes a failed result the model can react to.
    Recoverable,
}

/// Per-tool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Prompt file (relative to `prompts_dir`) activated after this tool runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_prompt: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrides the default tool timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// A named group of tools shown to the model as one meta-tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolBundle {
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Engine configuration: everything the cycle template needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Overall per-call timeout (applied by the caller)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,

    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,

    #[serde(default)]
    pub tool_bundles: HashMap<String, ToolBundle>,

    #[serde(default)]
    pub tool_resolution_mode: ToolResolutionMode,

    /// Use streaming providers when an emitter is attached
    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Interruption-handler prompt file (relative to `prompts_dir`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption_prompt: Option<String>,

    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,

    /// Include full messages and tool schemas in debug traces
    #[serde(default)]
    pub full_llm_logging: bool,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_true() -> bool {
    true
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
            timeout_secs: default_timeout_secs(),
            default_tool_timeout_secs: default_tool_timeout_secs(),
            tools: HashMap::new(),
            tool_bundles: HashMap::new(),
            tool_resolution_mode: ToolResolutionMode::default(),
            streaming: true,
            prompts_dir: default_prompts_dir(),
            interruption_prompt: None,
            timeout_policy: TimeoutPolicy::default(),
            full_llm_logging: false,
        }
    }
}

impl CycleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn default_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.default_tool_timeout_secs)
    }

    /// Deadline for one execution of `tool`.
    pub fn tool_timeout(&self, tool: &str) -> Duration {
        if let Some(secs) = self.tools.get(tool).and_then(|t| t.timeout_secs) {
            return Duration::from_secs(secs);
        }
        if tool == ASK_USER_TOOL {
            return Duration::from_secs(ASK_USER_TIMEOUT_SECS);
        }
        self.default_tool_timeout()
    }

    /// Resolved path of `tool`'s post-prompt, if one is configured and enabled.
    pub fn post_prompt_path(&self, tool: &str) -> Option<PathBuf> {
        let cfg = self.tools.get(tool)?;
        if !cfg.enabled {
            return None;
        }
        cfg.post_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| self.prompts_dir.join(p))
    }

    /// Resolved path of the interruption prompt, if configured.
    pub fn interruption_prompt_path(&self) -> Option<PathBuf> {
        let file = self.interruption_prompt.as_deref().filter(|p| !p.is_empty())?;
        let path = Path::new(file);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.prompts_dir.join(path))
        }
    }

    /// Validate the engine configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_prompt.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "chain.system_prompt must not be empty".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "chain.max_iterations must be > 0".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chain.timeout_secs must be > 0".into(),
            ));
        }
        for (name, bundle) in &self.tool_bundles {
            if bundle.tools.iter().any(|t| t.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "bundle '{name}' lists an empty tool name"
                )));
            }
        }
        Ok(())
    }

    /// Fail fast when an enabled post-prompt points at a missing file.
    pub fn check_prompt_files(&self) -> Result<(), ConfigError> {
        let mut tools: Vec<&String> = self.tools.keys().collect();
        tools.sort();
        for tool in tools {
            if let Some(path) = self.post_prompt_path(tool) {
                if !path.exists() {
                    return Err(ConfigError::PromptNotFound(path));
                }
            }
        }
        Ok(())
    }
}

/// Per-run debug trace settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default = "default_true")]
    pub include_tool_args: bool,

    #[serde(default = "default_true")]
    pub include_tool_results: bool,

    /// Tool results longer than this are truncated in the trace
    #[serde(default = "default_max_result_size")]
    pub max_result_size: usize,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("debug_logs")
}
fn default_max_result_size() -> usize {
    5000
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            logs_dir: default_logs_dir(),
            include_tool_args: true,
            include_tool_results: true,
            max_result_size: default_max_result_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `REACTLOOP_CONFIG` or `./reactloop.toml`.
    ///
    /// Environment overrides:
    /// - `REACTLOOP_MODEL` replaces `default_model`
    /// - `REACTLOOP_DEBUG=1` enables debug traces
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("REACTLOOP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("reactloop.toml"));
        let mut config = Self::load_from(&path)?;

        if let Ok(model) = std::env::var("REACTLOOP_MODEL") {
            config.default_model = model;
        }
        if let Ok(flag) = std::env::var("REACTLOOP_DEBUG") {
            config.debug.enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        config.chain.check_prompt_files()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chain.validate()?;

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }
        if !self.models.is_empty() && !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::ValidationError(format!(
                "default_model '{}' is not among the configured models",
                self.default_model
            )));
        }
        for (name, model) in &self.models {
            if model.temperature < 0.0 || model.temperature > 2.0 {
                return Err(ConfigError::ValidationError(format!(
                    "models.{name}.temperature must be between 0.0 and 2.0"
                )));
            }
        }
        if self.debug.max_result_size == 0 {
            return Err(ConfigError::ValidationError(
                "debug.max_result_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            models: HashMap::new(),
            chain: CycleConfig::default(),
            debug: DebugConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Prompt file not found: {}", .0.display())]
    PromptNotFound(PathBuf),
}

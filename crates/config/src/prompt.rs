//! Prompt files.
//!
//! A prompt file is TOML with an optional `[config]` table of model
//! overrides and a list of messages; the first system message is the prompt:
//!
//! ```toml
//! [config]
//! model = "glm-4.6"
//! temperature = 0.2
//!
//! [[messages]]
//! role = "system"
//! content = "Summarize the categories you just fetched."
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Model overrides carried by a prompt. `None` keeps the model default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Response format, e.g. "json_object"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptFile {
    #[serde(default)]
    pub config: PromptConfig,

    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

impl PromptFile {
    /// Load and parse a TOML prompt file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Content of the first message, if it is a system message.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }
}

/// Load a post-prompt: a TOML prompt file, or plain text when the file is
/// not a structured prompt.
pub fn load_prompt_text(path: &Path) -> Result<(String, PromptConfig), ConfigError> {
    let content = read(path)?;
    match toml::from_str::<PromptFile>(&content) {
        Ok(file) => match file.system_prompt() {
            Some(prompt) => Ok((prompt.to_string(), file.config)),
            None => Ok((content, file.config)),
        },
        Err(_) => Ok((content, PromptConfig::default())),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::PromptNotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

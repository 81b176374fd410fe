//! Model registry: named LLM providers with their default parameters.
//!
//! All models are registered once at startup; the engine resolves the model
//! for each call with a fallback to the configured default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ProviderError;
use crate::provider::Provider;

/// Per-model defaults, as configured for a registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Backend family (e.g., "openai", "zai", "deepseek")
    #[serde(default)]
    pub provider: String,

    /// Identifier sent to the provider
    pub model_name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Allow the model to request several tool calls in one turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Explicitly mark the model as vision-capable
    #[serde(default)]
    pub is_vision: bool,
}

fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    2000
}

impl ModelDef {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            provider: String::new(),
            model_name: model_name.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            parallel_tool_calls: None,
            is_vision: false,
        }
    }
}

/// Name-based vision heuristic: contains "vision" or starts with "v-".
pub fn is_vision_model_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("vision") || lower.starts_with("v-")
}

struct ModelEntry {
    provider: Arc<dyn Provider>,
    def: ModelDef,
}

/// Thread-safe registry of model providers.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, ModelEntry>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under `name`. Fails if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        def: ModelDef,
        provider: Arc<dyn Provider>,
    ) -> Result<(), ProviderError> {
        let name = name.into();
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        if models.contains_key(&name) {
            return Err(ProviderError::NotConfigured(format!(
                "model '{name}' already registered"
            )));
        }
        tracing::debug!(model = %name, provider = %provider.name(), "Registered model");
        models.insert(name, ModelEntry { provider, def });
        Ok(())
    }

    /// Look up a model by name.
    pub fn get(&self, name: &str) -> Result<(Arc<dyn Provider>, ModelDef), ProviderError> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models
            .get(name)
            .map(|entry| (entry.provider.clone(), entry.def.clone()))
            .ok_or_else(|| ProviderError::ModelNotFound(format!("model '{name}' not found in registry")))
    }

    /// Resolve `requested`, falling back to `default_model`.
    ///
    /// Returns the provider, its defaults, and the name that actually matched.
    pub fn get_with_fallback(
        &self,
        requested: &str,
        default_model: &str,
    ) -> Result<(Arc<dyn Provider>, ModelDef, String), ProviderError> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);

        for name in [requested, default_model] {
            if let Some(entry) = models.get(name) {
                return Ok((entry.provider.clone(), entry.def.clone(), name.to_string()));
            }
        }

        Err(ProviderError::ModelNotFound(format!(
            "neither requested model '{requested}' nor default '{default_model}' found in registry"
        )))
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` refers to a vision-capable model.
    ///
    /// The explicit `is_vision` flag wins; otherwise the name heuristic is
    /// applied to both the registry name and the provider-side model name.
    pub fn is_vision_model(&self, name: &str) -> bool {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        match models.get(name) {
            Some(entry) => {
                entry.def.is_vision
                    || is_vision_model_name(name)
                    || is_vision_model_name(&entry.def.model_name)
            }
            None => is_vision_model_name(name),
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .finish()
    }
}

//! Tool bundles: token-cheap tool disclosure.
//!
//! In `bundle-first` mode the model sees one summary per bundle instead of
//! every tool schema. Calling a bundle name expands it into the member tool
//! definitions, delivered as a system message.

use reactloop_config::{ToolBundle, ToolResolutionMode};
use reactloop_core::message::Message;
use reactloop_core::provider::ToolDefinition;
use reactloop_core::tool::ToolRegistry;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::error::EngineError;

pub struct BundleResolver {
    mode: ToolResolutionMode,
    bundles: HashMap<String, ToolBundle>,
    tools: Arc<ToolRegistry>,
    cache: RwLock<HashMap<String, Vec<ToolDefinition>>>,
}

impl BundleResolver {
    pub fn new(
        mode: ToolResolutionMode,
        bundles: HashMap<String, ToolBundle>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            mode,
            bundles,
            tools,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ToolResolutionMode {
        self.mode
    }

    /// Definitions to show the model before any expansion.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        match self.mode {
            ToolResolutionMode::Flat => self.full_definitions(),
            ToolResolutionMode::BundleFirst => self
                .bundle_names()
                .into_iter()
                .map(|name| ToolDefinition {
                    description: self.bundles[&name].description.clone(),
                    name,
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                })
                .collect(),
        }
    }

    /// Every tool in the registry.
    pub fn full_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    pub fn is_bundle_call(&self, name: &str) -> bool {
        self.mode == ToolResolutionMode::BundleFirst && self.bundles.contains_key(name)
    }

    /// Render the member tools of `name` as a system message.
    pub fn expand_bundle(&self, name: &str) -> Result<Message, EngineError> {
        let definitions = self.bundle_definitions(name)?;

        let mut text = format!(
            "# Tool Definitions from bundle: {name}\n\n\
             You now have access to the following tools from this bundle:\n\n"
        );
        for def in &definitions {
            let _ = write!(
                text,
                "## {}\nDescription: {}\nParameters: {}\n\n",
                def.name, def.description, def.parameters
            );
        }

        debug!(bundle = %name, tools = definitions.len(), "Expanded tool bundle");
        Ok(Message::system(text))
    }

    /// Member definitions of `name`, resolved once and cached.
    fn bundle_definitions(&self, name: &str) -> Result<Vec<ToolDefinition>, EngineError> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(cached.clone());
        }

        let bundle = self
            .bundles
            .get(name)
            .ok_or_else(|| EngineError::BundleNotFound(name.to_string()))?;

        // Unknown members are skipped
        let definitions: Vec<ToolDefinition> = bundle
            .tools
            .iter()
            .filter_map(|tool| self.tools.get(tool))
            .map(|tool| tool.definition())
            .collect();

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), definitions.clone());
        Ok(definitions)
    }

    /// Configured bundle names, sorted.
    pub fn bundle_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bundles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for BundleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleResolver")
            .field("mode", &self.mode)
            .field("bundles", &self.bundle_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EchoTool;

    fn resolver(mode: ToolResolutionMode) -> BundleResolver {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::named("get_categories")));
        registry.register(Arc::new(EchoTool::named("get_products")));
        registry.register(Arc::new(EchoTool::named("get_weather")));

        let mut bundles = HashMap::new();
        bundles.insert(
            "catalog".to_string(),
            ToolBundle {
                description: "Catalog browsing".into(),
                tools: vec![
                    "get_categories".into(),
                    "get_products".into(),
                    "missing_tool".into(),
                ],
            },
        );
        bundles.insert(
            "misc".to_string(),
            ToolBundle {
                description: "Everything else".into(),
                tools: vec!["get_weather".into()],
            },
        );
        BundleResolver::new(mode, bundles, Arc::new(registry))
    }

    #[test]
    fn flat_mode_shows_every_tool() {
        let r = resolver(ToolResolutionMode::Flat);
        let names: Vec<_> = r.tool_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_categories", "get_products", "get_weather"]);
        assert!(!r.is_bundle_call("catalog"));
    }

    #[test]
    fn bundle_first_shows_summaries() {
        let r = resolver(ToolResolutionMode::BundleFirst);
        let defs = r.tool_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "catalog");
        assert_eq!(defs[0].description, "Catalog browsing");
        assert_eq!(defs[0].parameters["properties"], serde_json::json!({}));
        assert!(r.is_bundle_call("catalog"));
        assert!(!r.is_bundle_call("get_weather"));
    }

    #[test]
    fn expansion_lists_only_known_members() {
        let r = resolver(ToolResolutionMode::BundleFirst);
        let message = r.expand_bundle("catalog").unwrap();

        assert_eq!(message.role, reactloop_core::message::Role::System);
        assert!(message.content.starts_with("# Tool Definitions from bundle: catalog\n\n"));
        assert!(message.content.contains("## get_categories\nDescription: "));
        assert!(message.content.contains("## get_products\n"));
        assert!(!message.content.contains("missing_tool"));
        assert!(!message.content.contains("get_weather"));
        assert_eq!(message.content.matches("## ").count(), 2);
    }

    #[test]
    fn expansion_is_cached() {
        let r = resolver(ToolResolutionMode::BundleFirst);
        let first = r.expand_bundle("catalog").unwrap();
        let second = r.expand_bundle("catalog").unwrap();
        assert_eq!(first, second);
        r.clear_cache();
        assert_eq!(r.expand_bundle("catalog").unwrap(), first);
    }

    #[test]
    fn unknown_bundle_is_an_error() {
        let r = resolver(ToolResolutionMode::BundleFirst);
        assert!(matches!(
            r.expand_bundle("nope"),
            Err(EngineError::BundleNotFound(name)) if name == "nope"
        ));
    }
}

//! The reusable ReAct template.
//!
//! A [`ReActCycle`] is built once and shared. Every [`ReActCycle::execute`]
//! call works on its own copy of the steps, its own context and its own
//! debug recorder. The only mutable data concurrent calls share is the
//! caller-supplied [`CoreState`] and the bundle definition cache, which is
//! kept per tool registry.

use reactloop_config::{ConfigError, CycleConfig, DebugConfig, ToolResolutionMode, load_prompt_text};
use reactloop_core::event::Emitter;
use reactloop_core::models::ModelRegistry;
use reactloop_core::state::CoreState;
use reactloop_core::tool::ToolRegistry;
use reactloop_telemetry::DebugRecorder;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bundle::BundleResolver;
use crate::chain::{ChainInput, ChainOutput};
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::executor::ReActExecutor;
use crate::llm_step::LlmStep;
use crate::observer::{DebugObserver, EmitterObserver, IterationEmitter};
use crate::signal::{ExecutionSignal, USER_CHOICE_REQUIRED};
use crate::tool_step::{LoadedPrompt, PromptLoader, ToolStep};

/// Capacity of the channel returned by [`ReActCycle::interrupt_channel`].
const INTERRUPT_CHANNEL_CAPACITY: usize = 8;

/// Settings that may change between calls. Snapshotted once per call.
#[derive(Clone)]
struct RuntimeDefaults {
    emitter: Option<Arc<dyn Emitter>>,
    debug: DebugConfig,
    streaming: bool,
    tool_timeouts: HashMap<String, Duration>,
}

/// Resolves post-prompts from the cycle's tool configuration.
struct ConfigPromptLoader {
    config: Arc<CycleConfig>,
}

impl PromptLoader for ConfigPromptLoader {
    fn load_tool_post_prompt(&self, tool: &str) -> Result<Option<LoadedPrompt>, ConfigError> {
        let Some(path) = self.config.post_prompt_path(tool) else {
            return Ok(None);
        };
        let (text, config) = load_prompt_text(&path)?;
        Ok(Some(LoadedPrompt { text, config, path }))
    }
}

pub struct ReActCycle {
    config: Arc<CycleConfig>,
    models: Option<Arc<ModelRegistry>>,
    tools: Option<Arc<ToolRegistry>>,
    state: Option<Arc<CoreState>>,
    default_model: Option<String>,
    runtime: RwLock<RuntimeDefaults>,
    /// Resolver for the most recent tool registry, reused while calls pass the same one
    bundles: Mutex<Option<(Arc<ToolRegistry>, Arc<BundleResolver>)>>,
}

impl ReActCycle {
    pub fn new(config: CycleConfig) -> Self {
        let runtime = RuntimeDefaults {
            emitter: None,
            debug: DebugConfig::default(),
            streaming: config.streaming,
            tool_timeouts: HashMap::new(),
        };
        Self {
            config: Arc::new(config),
            models: None,
            tools: None,
            state: None,
            default_model: None,
            runtime: RwLock::new(runtime),
            bundles: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    // ── Long-lived dependencies ───────────────────────────────────────

    pub fn set_model_registry(&mut self, models: Arc<ModelRegistry>) {
        self.models = Some(models);
    }

    pub fn set_tool_registry(&mut self, tools: Arc<ToolRegistry>) {
        self.tools = Some(tools);
    }

    /// State used by [`Self::run`].
    pub fn set_state(&mut self, state: Arc<CoreState>) {
        self.state = Some(state);
    }

    pub fn set_default_model(&mut self, name: impl Into<String>) {
        self.default_model = Some(name.into());
    }

    /// Directory post-prompt and interruption prompt files are resolved against.
    pub fn set_prompts_dir(&mut self, dir: impl Into<PathBuf>) {
        Arc::make_mut(&mut self.config).prompts_dir = dir.into();
    }

    // ── Runtime defaults ──────────────────────────────────────────────

    pub fn set_emitter(&self, emitter: Arc<dyn Emitter>) {
        self.runtime_mut().emitter = Some(emitter);
    }

    pub fn set_debug_config(&self, debug: DebugConfig) {
        self.runtime_mut().debug = debug;
    }

    pub fn set_streaming(&self, enabled: bool) {
        self.runtime_mut().streaming = enabled;
    }

    /// Override one tool's deadline for calls started after this returns.
    pub fn set_tool_timeout(&self, tool: impl Into<String>, timeout: Duration) {
        self.runtime_mut().tool_timeouts.insert(tool.into(), timeout);
    }

    fn runtime_mut(&self) -> std::sync::RwLockWriteGuard<'_, RuntimeDefaults> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> RuntimeDefaults {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Run one query through the loop.
    pub async fn execute(&self, input: ChainInput) -> Result<ChainOutput, EngineError> {
        let models = self.models.clone().ok_or(EngineError::MissingModelRegistry)?;
        let default_model = self
            .default_model
            .clone()
            .ok_or(EngineError::MissingDefaultModel)?;

        let runtime = self.snapshot();
        let events = runtime.emitter.clone().map(IterationEmitter::new);
        let recorder = runtime
            .debug
            .enabled
            .then(|| Arc::new(DebugRecorder::new(runtime.debug.clone())));

        let mut llm_step = LlmStep::new(models, default_model, &self.config.system_prompt)
            .with_streaming(runtime.streaming)
            .with_full_llm_logging(self.config.full_llm_logging);
        if let Some(bundles) = self.bundle_resolver(&input) {
            llm_step = llm_step.with_bundles(bundles);
        }

        let mut tool_step = ToolStep::new(self.config.clone())
            .with_tool_timeouts(runtime.tool_timeouts)
            .with_prompt_loader(Arc::new(ConfigPromptLoader {
                config: self.config.clone(),
            }));

        if let Some(events) = &events {
            llm_step = llm_step.with_emitter(events.clone());
        }
        if let Some(recorder) = &recorder {
            llm_step = llm_step.with_recorder(recorder.clone());
            tool_step = tool_step.with_recorder(recorder.clone());
        }

        let mut executor =
            ReActExecutor::new(Box::new(llm_step), Box::new(tool_step), self.config.clone());
        if let Some(recorder) = recorder {
            executor.add_observer(Box::new(DebugObserver::new(recorder.clone())));
            executor = executor.with_recorder(recorder);
        }
        if let Some(emitter) = runtime.emitter {
            executor.add_observer(Box::new(EmitterObserver::new(emitter)));
        }
        if let Some(events) = events {
            executor = executor.with_events(events);
        }

        let ctx = ExecutionContext::new(input);
        executor.execute(&ctx).await
    }

    /// [`Self::execute`] bounded by the configured overall timeout.
    ///
    /// At the deadline the call is cancelled and allowed to unwind, so the
    /// error event and debug trace are still produced.
    pub async fn with_timeout(&self, mut input: ChainInput) -> Result<ChainOutput, EngineError> {
        let limit = self.config.timeout();
        // Cancelling the child leaves the caller's token alone
        let deadline = input.cancel.child_token();
        input.cancel = deadline.clone();

        let run = self.execute(input);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(limit) => {
                warn!(timeout = ?limit, "Cycle timed out, cancelling");
                deadline.cancel();
                match run.await {
                    Err(EngineError::Cancelled) => Err(EngineError::Timeout(limit)),
                    other => other,
                }
            }
        }
    }

    /// Run `query` against the template's own state and tools.
    ///
    /// Returns [`USER_CHOICE_REQUIRED`] when the model asked the user to choose.
    pub async fn run(&self, query: &str) -> Result<String, EngineError> {
        let tools = self.tools.clone().ok_or(EngineError::MissingToolRegistry)?;
        let state = self.state.clone().ok_or(EngineError::MissingState)?;

        let output = self.execute(ChainInput::new(query, state, tools)).await?;
        if output.signal == ExecutionSignal::NeedUserInput {
            info!("Model requested a user choice");
            return Ok(USER_CHOICE_REQUIRED.to_string());
        }
        Ok(output.result)
    }

    /// The post-prompt configured for `tool`, if any.
    pub fn load_tool_post_prompt(&self, tool: &str) -> Result<Option<LoadedPrompt>, ConfigError> {
        ConfigPromptLoader {
            config: self.config.clone(),
        }
        .load_tool_post_prompt(tool)
    }

    /// A channel for delivering interruptions; pass the receiver via
    /// [`ChainInput::with_interruptions`].
    pub fn interrupt_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(INTERRUPT_CHANNEL_CAPACITY)
    }

    fn bundle_resolver(&self, input: &ChainInput) -> Option<Arc<BundleResolver>> {
        let mode = self.config.tool_resolution_mode;
        if mode == ToolResolutionMode::Flat && self.config.tool_bundles.is_empty() {
            return None;
        }

        let mut cached = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((tools, resolver)) = cached.as_ref() {
            if Arc::ptr_eq(tools, &input.tools) {
                return Some(resolver.clone());
            }
        }

        debug!(mode = ?mode, bundles = self.config.tool_bundles.len(), "Building bundle resolver");
        let resolver = Arc::new(BundleResolver::new(
            mode,
            self.config.tool_bundles.clone(),
            input.tools.clone(),
        ));
        *cached = Some((input.tools.clone(), resolver.clone()));
        Some(resolver)
    }
}

impl std::fmt::Debug for ReActCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReActCycle")
            .field("default_model", &self.default_model)
            .field("max_iterations", &self.config.max_iterations)
            .field("has_models", &self.models.is_some())
            .field("has_tools", &self.tools.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, SequentialMockProvider};
    use reactloop_core::models::ModelDef;

    fn cycle_with(provider: Arc<SequentialMockProvider>) -> ReActCycle {
        let models = ModelRegistry::new();
        models
            .register("default", ModelDef::new("mock-model"), provider)
            .unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool::named("get_x")));

        let mut cycle = ReActCycle::new(CycleConfig::default());
        cycle.set_model_registry(Arc::new(models));
        cycle.set_default_model("default");
        cycle.set_tool_registry(Arc::new(tools));
        cycle.set_state(Arc::new(CoreState::new()));
        cycle
    }

    #[tokio::test]
    async fn missing_dependencies_fail_fast() {
        let cycle = ReActCycle::new(CycleConfig::default());
        let input = ChainInput::new(
            "q",
            Arc::new(CoreState::new()),
            Arc::new(ToolRegistry::new()),
        );
        assert!(matches!(
            cycle.execute(input).await,
            Err(EngineError::MissingModelRegistry)
        ));

        let mut cycle = ReActCycle::new(CycleConfig::default());
        cycle.set_model_registry(Arc::new(ModelRegistry::new()));
        cycle.set_default_model("default");
        assert!(matches!(
            cycle.run("q").await,
            Err(EngineError::MissingToolRegistry)
        ));
    }

    #[tokio::test]
    async fn run_returns_the_answer() {
        let cycle = cycle_with(Arc::new(SequentialMockProvider::single_text("4")));
        assert_eq!(cycle.run("2+2?").await.unwrap(), "4");
    }

    #[tokio::test]
    async fn run_maps_user_choice_to_marker() {
        let cycle = cycle_with(Arc::new(SequentialMockProvider::single_text(
            USER_CHOICE_REQUIRED,
        )));
        assert_eq!(cycle.run("q").await.unwrap(), USER_CHOICE_REQUIRED);
    }

    #[test]
    fn bundle_resolver_is_reused_per_tool_registry() {
        let mut config = CycleConfig {
            tool_resolution_mode: ToolResolutionMode::BundleFirst,
            ..CycleConfig::default()
        };
        config.tool_bundles.insert(
            "x".into(),
            reactloop_config::ToolBundle {
                description: "X lookups".into(),
                tools: vec!["get_x".into()],
            },
        );
        let cycle = ReActCycle::new(config);

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool::named("get_x")));
        let tools = Arc::new(tools);
        let first = ChainInput::new("a", Arc::new(CoreState::new()), tools.clone());
        let second = ChainInput::new("b", Arc::new(CoreState::new()), tools);

        let a = cycle.bundle_resolver(&first).unwrap();
        let b = cycle.bundle_resolver(&second).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = ChainInput::new(
            "c",
            Arc::new(CoreState::new()),
            Arc::new(ToolRegistry::new()),
        );
        let c = cycle.bundle_resolver(&other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        assert!(ReActCycle::new(CycleConfig::default())
            .bundle_resolver(&first)
            .is_none());
    }

    #[test]
    fn post_prompt_loader_resolves_against_prompts_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x_post.txt"), "Summarize x.").unwrap();

        let mut config = CycleConfig::default();
        config.tools.insert(
            "get_x".into(),
            reactloop_config::ToolConfig {
                post_prompt: Some("x_post.txt".into()),
                enabled: true,
                timeout_secs: None,
            },
        );
        let mut cycle = ReActCycle::new(config);
        cycle.set_prompts_dir(dir.path());

        let loaded = cycle.load_tool_post_prompt("get_x").unwrap().unwrap();
        assert_eq!(loaded.text, "Summarize x.");
        assert_eq!(loaded.path, dir.path().join("x_post.txt"));
        assert!(cycle.load_tool_post_prompt("other").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_bounds_the_call() {
        struct Slow;
        #[async_trait::async_trait]
        impl reactloop_core::provider::Provider for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            async fn generate(
                &self,
                _messages: &[reactloop_core::message::Message],
                _options: &reactloop_core::provider::GenerateOptions,
            ) -> Result<reactloop_core::message::Message, reactloop_core::error::ProviderError>
            {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(reactloop_core::message::Message::assistant("late"))
            }
        }

        let models = ModelRegistry::new();
        models
            .register("default", ModelDef::new("slow"), Arc::new(Slow))
            .unwrap();
        let mut cycle = ReActCycle::new(CycleConfig {
            timeout_secs: 5,
            ..CycleConfig::default()
        });
        cycle.set_model_registry(Arc::new(models));
        cycle.set_default_model("default");

        let input = ChainInput::new(
            "q",
            Arc::new(CoreState::new()),
            Arc::new(ToolRegistry::new()),
        );
        let err = cycle.with_timeout(input).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_secs(5)));
    }
}

//! Model-invocation step.
//!
//! Resolves the model and its parameters (post-prompt overrides first, then
//! the model defaults), builds the context, calls the provider and appends
//! the assistant message. A call to a tool bundle is expanded and answered by
//! exactly one more model call.

use async_trait::async_trait;
use reactloop_config::PromptConfig;
use reactloop_core::message::Message;
use reactloop_core::models::{ModelDef, ModelRegistry};
use reactloop_core::provider::{ChunkKind, GenerateOptions, Provider, StreamChunk};
use reactloop_telemetry::{DebugRecorder, LlmRequestRecord, LlmResponseRecord, ToolCallRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::bundle::BundleResolver;
use crate::context::{ExecutionContext, ResolvedModel};
use crate::error::EngineError;
use crate::observer::IterationEmitter;
use crate::signal::StepResult;
use crate::step::Step;

#[derive(Clone)]
pub struct LlmStep {
    models: Arc<ModelRegistry>,
    default_model: String,
    system_prompt: String,
    bundles: Option<Arc<BundleResolver>>,
    emitter: Option<IterationEmitter>,
    recorder: Option<Arc<DebugRecorder>>,
    streaming: bool,
    full_llm_logging: bool,
}

impl LlmStep {
    pub fn new(
        models: Arc<ModelRegistry>,
        default_model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            models,
            default_model: default_model.into(),
            system_prompt: system_prompt.into(),
            bundles: None,
            emitter: None,
            recorder: None,
            streaming: false,
            full_llm_logging: false,
        }
    }

    pub fn with_bundles(mut self, bundles: Arc<BundleResolver>) -> Self {
        self.bundles = Some(bundles);
        self
    }

    pub fn with_emitter(mut self, emitter: IterationEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<DebugRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_full_llm_logging(mut self, enabled: bool) -> Self {
        self.full_llm_logging = enabled;
        self
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<StepResult, EngineError> {
        // ── Resolve model ──
        let active = ctx.active_post_prompt();
        let prompt_config = active.as_ref().map(|p| &p.config);
        let requested = prompt_config
            .and_then(|c| c.model.as_deref())
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);

        let (provider, def, actual) = self
            .models
            .get_with_fallback(requested, &self.default_model)?;
        let mut options = resolve_options(&def, prompt_config);
        let vision = self.models.is_vision_model(&actual);

        // ── Build request ──
        let messages = ctx.build_context_messages_for_model(&self.system_prompt, &actual, vision);
        options.tools = match &self.bundles {
            Some(bundles) => bundles.tool_definitions(),
            None => ctx.tools().definitions(),
        };
        self.record_request(&actual, &options, &messages, active.is_some(), false);

        debug!(
            model = %actual,
            iteration = ctx.iteration(),
            messages = messages.len(),
            tools = options.tools.len(),
            "Calling LLM"
        );

        // ── Call LLM ──
        let mut response = self
            .generate(ctx, provider.as_ref(), &messages, &options)
            .await?;
        ctx.append(response.clone())?;

        // ── Bundle expansion ──
        if let Some(bundles) = &self.bundles {
            let called: Vec<String> = response
                .tool_calls
                .iter()
                .filter(|c| bundles.is_bundle_call(&c.name))
                .map(|c| c.name.clone())
                .collect();

            if !called.is_empty() {
                for name in &called {
                    ctx.append(bundles.expand_bundle(name)?)?;
                }
                info!(bundles = ?called, "Re-invoking LLM with expanded bundle tools");

                let messages =
                    ctx.build_context_messages_for_model(&self.system_prompt, &actual, vision);
                options.tools = bundles.full_definitions();
                self.record_request(&actual, &options, &messages, active.is_some(), true);

                response = self
                    .generate(ctx, provider.as_ref(), &messages, &options)
                    .await?;
                if let Some(nested) = response
                    .tool_calls
                    .iter()
                    .find(|c| bundles.is_bundle_call(&c.name))
                {
                    return Err(EngineError::NestedBundleCall(nested.name.clone()));
                }
                ctx.append(response.clone())?;
            }
        }

        ctx.set_resolved_model(ResolvedModel {
            name: actual,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        });

        // ── Signal ──
        if response.tool_calls.is_empty() {
            Ok(StepResult::for_final_content(&response.content))
        } else {
            Ok(StepResult::continue_())
        }
    }

    /// One provider call, raced against cancellation and recorded.
    async fn generate(
        &self,
        ctx: &ExecutionContext,
        provider: &dyn Provider,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Message, EngineError> {
        let stream_to = self
            .emitter
            .as_ref()
            .filter(|_| self.streaming && provider.supports_streaming());
        ctx.set_streamed(stream_to.is_some());

        let call = async {
            match stream_to {
                Some(emitter) => {
                    let on_chunk = |chunk: StreamChunk| match chunk.kind {
                        ChunkKind::Thinking => {
                            emitter.thinking_chunk(&chunk.delta, &chunk.reasoning_content)
                        }
                        ChunkKind::Error => {
                            emitter.error(chunk.error.as_deref().unwrap_or("stream error"))
                        }
                        ChunkKind::Content | ChunkKind::Done => {}
                    };
                    provider.generate_stream(messages, options, &on_chunk).await
                }
                None => provider.generate(messages, options).await,
            }
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(EngineError::Cancelled),
            result = call => result.map_err(EngineError::from),
        };
        self.record_response(&result, started.elapsed().as_millis() as u64);
        result
    }

    fn record_request(
        &self,
        model: &str,
        options: &GenerateOptions,
        messages: &[Message],
        post_prompt: bool,
        bundle_reinvocation: bool,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        recorder.record_llm_request(LlmRequestRecord {
            model: model.to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            format: options.format.clone(),
            system_prompt_used: if post_prompt { "post_prompt" } else { "default" }.to_string(),
            messages_count: messages.len(),
            messages: self.full_llm_logging.then(|| messages.to_vec()),
            tools: self.full_llm_logging.then(|| options.tools.clone()),
            parallel_tool_calls: options.parallel_tool_calls,
            bundle_reinvocation,
        });
    }

    fn record_response(&self, result: &Result<Message, EngineError>, duration_ms: u64) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let record = match result {
            Ok(message) => LlmResponseRecord {
                content: message.content.clone(),
                tool_calls: message.tool_calls.iter().map(ToolCallRecord::from).collect(),
                duration_ms,
                error: None,
            },
            Err(e) => LlmResponseRecord {
                duration_ms,
                error: Some(e.to_string()),
                ..Default::default()
            },
        };
        recorder.record_llm_response(record);
    }
}

/// Model defaults with the prompt's non-empty overrides applied.
fn resolve_options(def: &ModelDef, overrides: Option<&PromptConfig>) -> GenerateOptions {
    let mut options = GenerateOptions {
        model: def.model_name.clone(),
        temperature: def.temperature,
        max_tokens: def.max_tokens,
        parallel_tool_calls: def.parallel_tool_calls,
        ..Default::default()
    };
    if let Some(cfg) = overrides {
        if let Some(temperature) = cfg.temperature {
            options.temperature = temperature;
        }
        if let Some(max_tokens) = cfg.max_tokens.filter(|n| *n > 0) {
            options.max_tokens = max_tokens;
        }
        if let Some(format) = cfg.format.as_deref().filter(|f| !f.is_empty()) {
            options.format = format.to_string();
        }
    }
    options
}

#[async_trait]
impl Step for LlmStep {
    fn name(&self) -> &str {
        "llm_invocation"
    }

    async fn execute(&self, ctx: &ExecutionContext) -> StepResult {
        match self.run(ctx).await {
            Ok(result) => result,
            Err(e) => StepResult::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainInput;
    use crate::signal::{ExecutionSignal, NextAction, USER_CHOICE_REQUIRED};
    use crate::test_helpers::{
        CollectingEmitter, EchoTool, SequentialMockProvider, make_tool_call,
        make_tool_call_response,
    };
    use reactloop_config::{ToolBundle, ToolResolutionMode};
    use reactloop_core::event::EventKind;
    use reactloop_core::message::Role;
    use reactloop_core::state::CoreState;
    use reactloop_core::tool::ToolRegistry;
    use std::collections::HashMap;

    fn registry_with(provider: Arc<SequentialMockProvider>) -> Arc<ModelRegistry> {
        let models = ModelRegistry::new();
        let mut def = ModelDef::new("mock-model");
        def.temperature = 0.7;
        def.max_tokens = 1000;
        models.register("default", def, provider).unwrap();
        Arc::new(models)
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::named("get_categories")));
        registry.register(Arc::new(EchoTool::named("get_products")));
        Arc::new(registry)
    }

    fn context(tools: Arc<ToolRegistry>) -> ExecutionContext {
        ExecutionContext::new(ChainInput::new("q", Arc::new(CoreState::new()), tools))
    }

    #[tokio::test]
    async fn text_answer_is_final() {
        let provider = Arc::new(SequentialMockProvider::single_text("4"));
        let step = LlmStep::new(registry_with(provider.clone()), "default", "Be brief");
        let ctx = context(tools());

        let result = step.execute(&ctx).await;
        assert_eq!(result.action, NextAction::Break);
        assert_eq!(result.signal, ExecutionSignal::FinalAnswer);
        assert_eq!(ctx.last_message().unwrap().content, "4");

        let requests = provider.requests();
        assert_eq!(requests[0].0[0].content, "Be brief");
        assert_eq!(requests[0].1.tools.len(), 2);
        assert_eq!(ctx.resolved_model().name, "default");
    }

    #[tokio::test]
    async fn tool_calls_continue() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("get_categories", serde_json::json!({}))],
            "",
        )]));
        let step = LlmStep::new(registry_with(provider), "default", "p");
        let ctx = context(tools());

        let result = step.execute(&ctx).await;
        assert_eq!(result.action, NextAction::Continue);
        assert_eq!(result.signal, ExecutionSignal::None);
    }

    #[tokio::test]
    async fn user_choice_marker_needs_input() {
        let provider = Arc::new(SequentialMockProvider::single_text(USER_CHOICE_REQUIRED));
        let step = LlmStep::new(registry_with(provider), "default", "p");

        let result = step.execute(&context(tools())).await;
        assert_eq!(result.signal, ExecutionSignal::NeedUserInput);
    }

    #[tokio::test]
    async fn post_prompt_overrides_parameters() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let step = LlmStep::new(registry_with(provider.clone()), "default", "base");
        let ctx = context(tools());
        ctx.set_active_post_prompt(
            "Summarize",
            PromptConfig {
                model: Some("unregistered".into()),
                temperature: Some(0.1),
                max_tokens: Some(0),
                format: Some("json_object".into()),
            },
        );

        step.execute(&ctx).await;
        let (messages, options) = &provider.requests()[0];
        assert_eq!(messages[0].content, "Summarize");
        assert_eq!(options.model, "mock-model");
        assert_eq!(options.temperature, 0.1);
        assert_eq!(options.max_tokens, 1000);
        assert_eq!(options.format, "json_object");
        // Unknown override model falls back to the default
        assert_eq!(ctx.resolved_model().name, "default");
    }

    #[tokio::test]
    async fn provider_failure_is_a_step_error() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let step = LlmStep::new(registry_with(provider), "default", "p");

        let result = step.execute(&context(tools())).await;
        assert!(matches!(result.error, Some(EngineError::Provider(_))));
        assert_eq!(result.signal, ExecutionSignal::Error);
    }

    #[tokio::test]
    async fn missing_model_is_a_step_error() {
        let provider = Arc::new(SequentialMockProvider::single_text("x"));
        let step = LlmStep::new(registry_with(provider), "nope", "p");

        let result = step.execute(&context(tools())).await;
        assert!(result.is_error());
    }

    fn bundle_resolver(tools: Arc<ToolRegistry>) -> Arc<BundleResolver> {
        let bundles = HashMap::from([(
            "catalog".to_string(),
            ToolBundle {
                description: "Catalog tools".into(),
                tools: vec!["get_categories".into(), "get_products".into()],
            },
        )]);
        Arc::new(BundleResolver::new(
            ToolResolutionMode::BundleFirst,
            bundles,
            tools,
        ))
    }

    #[tokio::test]
    async fn bundle_call_expands_and_reinvokes_once() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("catalog", serde_json::json!({}))], ""),
            make_tool_call_response(
                vec![make_tool_call("get_categories", serde_json::json!({}))],
                "",
            ),
        ]));
        let tools = tools();
        let step = LlmStep::new(registry_with(provider.clone()), "default", "p")
            .with_bundles(bundle_resolver(tools.clone()));
        let ctx = context(tools);

        let result = step.execute(&ctx).await;
        assert_eq!(result.action, NextAction::Continue);
        assert_eq!(provider.call_count(), 2);

        let requests = provider.requests();
        let first_tools: Vec<_> = requests[0].1.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(first_tools, vec!["catalog"]);
        assert_eq!(requests[1].1.tools.len(), 2);

        let history = ctx.state().history();
        let expansions: Vec<_> = history
            .iter()
            .filter(|m| m.role == Role::System && m.content.starts_with("# Tool Definitions"))
            .collect();
        assert_eq!(expansions.len(), 1);
        assert_eq!(history.last().unwrap().tool_calls[0].name, "get_categories");
    }

    #[tokio::test]
    async fn reinvocation_request_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(DebugRecorder::new(reactloop_config::DebugConfig {
            enabled: true,
            logs_dir: dir.path().to_path_buf(),
            ..Default::default()
        }));
        recorder.start("q");
        recorder.start_iteration(1);

        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("catalog", serde_json::json!({}))], ""),
            make_tool_call_response(
                vec![make_tool_call("get_products", serde_json::json!({}))],
                "",
            ),
        ]));
        let tools = tools();
        let step = LlmStep::new(registry_with(provider), "default", "p")
            .with_bundles(bundle_resolver(tools.clone()))
            .with_recorder(recorder.clone())
            .with_full_llm_logging(true);

        step.execute(&context(tools)).await;
        recorder.end_iteration();

        let log = recorder.snapshot().unwrap();
        assert_eq!(log.summary.total_llm_calls, 2);
        let iteration = &log.iterations[0];
        let request = iteration.llm_request.as_ref().unwrap();
        assert!(request.bundle_reinvocation);
        // The recorded tool set matches the call that produced the response
        let tool_names: Vec<_> = request
            .tools
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(tool_names.len(), 2);
        assert!(!tool_names.contains(&"catalog"));
        let response = iteration.llm_response.as_ref().unwrap();
        assert_eq!(response.tool_calls[0].name, "get_products");
    }

    #[tokio::test]
    async fn nested_bundle_call_is_rejected() {
        let bundle_call =
            make_tool_call_response(vec![make_tool_call("catalog", serde_json::json!({}))], "");
        let provider = Arc::new(SequentialMockProvider::new(vec![
            bundle_call.clone(),
            bundle_call,
        ]));
        let tools = tools();
        let step = LlmStep::new(registry_with(provider), "default", "p")
            .with_bundles(bundle_resolver(tools.clone()));

        let result = step.execute(&context(tools)).await;
        assert!(matches!(result.error, Some(EngineError::NestedBundleCall(ref b)) if b == "catalog"));
    }

    #[tokio::test]
    async fn streaming_emits_thinking_chunks() {
        let provider = Arc::new(SequentialMockProvider::single_text("answer").with_streaming());
        let sink = Arc::new(CollectingEmitter::default());
        let step = LlmStep::new(registry_with(provider), "default", "p")
            .with_emitter(IterationEmitter::new(sink.clone()))
            .with_streaming(true);
        let ctx = context(tools());

        step.execute(&ctx).await;
        assert!(ctx.streamed());
        let events = sink.events();
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.kind() == EventKind::ThinkingChunk));
    }

    #[tokio::test]
    async fn cancellation_stops_the_call() {
        let provider = Arc::new(SequentialMockProvider::single_text("never"));
        let step = LlmStep::new(registry_with(provider), "default", "p");
        let ctx = context(tools());
        ctx.cancel_token().cancel();

        let result = step.execute(&ctx).await;
        assert!(matches!(result.error, Some(EngineError::Cancelled)));
        assert_eq!(ctx.state().history_len(), 0);
    }
}

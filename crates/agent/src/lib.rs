//! The ReAct execution engine.
//!
//! A call alternates between two steps until the model produces a final
//! answer or the iteration cap is reached:
//!
//! 1. **Model step**: build the context (system prompt or active post-prompt
//!    plus history), call the resolved model, append its reply
//! 2. **Tool step**: run every requested tool under its own deadline, append
//!    one `tool` message per call
//!
//! User interruptions, per-tool post-prompts and tool bundles all change
//! what the next model call sees without aborting the call.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use reactloop_agent::{ChainInput, ReActCycle};
//! # use reactloop_config::CycleConfig;
//! # use reactloop_core::{CoreState, ModelRegistry, ToolRegistry};
//! # async fn demo(models: Arc<ModelRegistry>) -> Result<(), reactloop_agent::EngineError> {
//! let mut cycle = ReActCycle::new(CycleConfig::default());
//! cycle.set_model_registry(models);
//! cycle.set_default_model("default");
//!
//! let input = ChainInput::new(
//!     "What is 2+2?",
//!     Arc::new(CoreState::new()),
//!     Arc::new(ToolRegistry::new()),
//! );
//! let output = cycle.execute(input).await?;
//! println!("{} ({} iterations)", output.result, output.iterations);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod chain;
pub mod context;
pub mod cycle;
pub mod error;
pub mod executor;
pub mod interruption;
pub mod llm_step;
pub mod observer;
pub mod signal;
pub mod step;
pub mod tool_step;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bundle::BundleResolver;
pub use chain::{ChainInput, ChainOutput};
pub use context::ExecutionContext;
pub use cycle::ReActCycle;
pub use error::EngineError;
pub use executor::ReActExecutor;
pub use interruption::{DEFAULT_INTERRUPTION_PROMPT, InterruptionPrompt, load_interruption_prompt};
pub use llm_step::LlmStep;
pub use observer::{DebugObserver, EmitterObserver, ExecutionObserver, IterationEmitter};
pub use signal::{ExecutionSignal, NextAction, StepResult, USER_CHOICE_REQUIRED};
pub use step::Step;
pub use tool_step::{LoadedPrompt, PromptLoader, ToolOutcome, ToolStep};

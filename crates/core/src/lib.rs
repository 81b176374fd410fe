//! # ReactLoop Core
//!
//! Domain types, traits, and error definitions for the ReactLoop agent engine.
//! This crate has **no engine logic**. It defines the vocabulary that the
//! config, telemetry and agent crates are written against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model provider, tool, UI sink) is a trait here.
//! Concrete implementations live outside the engine. This enables:
//! - Plugging any LLM backend behind [`Provider`]
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod models;
pub mod provider;
pub mod sanitize;
pub mod state;
pub mod todo;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, StateError, ToolError};
pub use event::{Emitter, Event, EventBus, EventData, EventKind};
pub use message::{Message, Role, ToolCall};
pub use models::{ModelDef, ModelRegistry};
pub use provider::{ChunkKind, GenerateOptions, Provider, StreamChunk, ToolDefinition};
pub use state::{CoreState, FileMeta};
pub use todo::{Task, TaskPlan, TaskStatus};
pub use tool::{Tool, ToolRegistry};

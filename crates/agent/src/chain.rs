//! Input and output of one engine call.

use reactloop_core::message::Message;
use reactloop_core::state::CoreState;
use reactloop_core::tool::ToolRegistry;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::signal::ExecutionSignal;

/// Everything one call needs. Not modified once the call starts.
pub struct ChainInput {
    pub user_query: String,
    pub state: Arc<CoreState>,
    pub tools: Arc<ToolRegistry>,
    /// Messages typed by the user while the call runs
    pub interruptions: Option<Mutex<mpsc::Receiver<String>>>,
    /// Governs the whole call
    pub cancel: CancellationToken,
}

impl ChainInput {
    pub fn new(
        user_query: impl Into<String>,
        state: Arc<CoreState>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            user_query: user_query.into(),
            state,
            tools,
            interruptions: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the receiving end of an interruption channel.
    pub fn with_interruptions(mut self, receiver: mpsc::Receiver<String>) -> Self {
        self.interruptions = Some(Mutex::new(receiver));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl std::fmt::Debug for ChainInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainInput")
            .field("user_query", &self.user_query)
            .field("tools", &self.tools.len())
            .field("interruptible", &self.interruptions.is_some())
            .finish()
    }
}

/// The result of a completed call.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Final answer text (content of the last assistant message)
    pub result: String,
    pub iterations: u32,
    pub duration: Duration,
    /// History snapshot at completion
    pub final_state: Vec<Message>,
    /// Debug trace file, when recording was enabled
    pub debug_path: Option<PathBuf>,
    pub signal: ExecutionSignal,
}

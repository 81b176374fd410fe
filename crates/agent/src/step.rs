//! The step abstraction.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::signal::StepResult;

/// One unit of work in an iteration: model invocation or tool invocation.
///
/// Steps never return `Err`; failures travel inside the [`StepResult`].
#[async_trait]
pub trait Step: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &ExecutionContext) -> StepResult;
}

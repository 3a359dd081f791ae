//! TaskRunner trait definition

use async_trait::async_trait;
use serde::Serialize;

use super::RunnerError;
use crate::context::TaskContext;
use crate::domain::TaskOptions;
use crate::executor::ModelCapabilities;

/// Everything a runner needs to execute one task
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub agent_type: String,
    pub model: String,
    pub capabilities: ModelCapabilities,
    /// System prompt followed by the task text
    pub prompt: String,
    pub options: TaskOptions,
}

/// External execution collaborator
///
/// Runs the resolved prompt against the selected model and returns its
/// output. Implementations must return promptly once `ctx` is cancelled.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: &TaskContext, request: RunRequest) -> Result<String, RunnerError>;
}

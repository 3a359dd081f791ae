//! TaskExecutor - runs one task end-to-end and narrates it as events
//!
//! Pipeline: validate agent type → load prompt → select model → run → done.
//! The agent's timeout bounds the whole pipeline. On expiry the task's
//! context is cancelled so the runner can stop, and the task fails at the
//! execution stage.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::model::ModelSelector;
use crate::context::{IdGenerator, TaskContext};
use crate::domain::{FailureKind, Stage, Task, TaskFailure, TaskResult};
use crate::events::{EventBus, TaskEmitter, millis};
use crate::prompts::PromptProvider;
use crate::runner::{RunRequest, RunnerError, TaskRunner};

/// Default per-task timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Agent types accepted when none are configured
pub const DEFAULT_AGENT_TYPES: [&str; 4] = ["code-implementer", "sprint-planner", "test-specialist", "validation-expert"];

/// Default timeout plus per-agent overrides
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    pub default: Duration,
    pub per_agent: HashMap<String, Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_TIMEOUT,
            per_agent: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn from_millis(default_ms: u64, per_agent_ms: &HashMap<String, u64>) -> Self {
        Self {
            default: Duration::from_millis(default_ms),
            per_agent: per_agent_ms
                .iter()
                .map(|(agent, ms)| (agent.clone(), Duration::from_millis(*ms)))
                .collect(),
        }
    }

    pub fn for_agent(&self, agent_type: &str) -> Duration {
        self.per_agent.get(agent_type).copied().unwrap_or(self.default)
    }
}

/// Executes single tasks
///
/// Safe to share across concurrent executions; the only mutable state is the
/// read-mostly timeout table.
pub struct TaskExecutor {
    prompts: Arc<dyn PromptProvider>,
    runner: Arc<dyn TaskRunner>,
    bus: Option<Arc<EventBus>>,
    timeouts: RwLock<TimeoutConfig>,
    selector: ModelSelector,
    known_agents: BTreeSet<String>,
    ids: IdGenerator,
}

impl TaskExecutor {
    pub fn new(prompts: Arc<dyn PromptProvider>, runner: Arc<dyn TaskRunner>) -> Self {
        debug!("TaskExecutor::new: called");
        Self {
            prompts,
            runner,
            bus: None,
            timeouts: RwLock::new(TimeoutConfig::default()),
            selector: ModelSelector::new(),
            known_agents: DEFAULT_AGENT_TYPES.iter().map(|s| s.to_string()).collect(),
            ids: IdGenerator::new("task"),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_timeouts(self, timeouts: TimeoutConfig) -> Self {
        if let Ok(mut current) = self.timeouts.write() {
            *current = timeouts;
        }
        self
    }

    /// Replace the set of accepted agent types; an empty list keeps the defaults
    pub fn with_known_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents: BTreeSet<String> = agents.into_iter().map(Into::into).collect();
        if !agents.is_empty() {
            self.known_agents = agents;
        }
        self
    }

    pub fn bus(&self) -> Option<&Arc<EventBus>> {
        self.bus.as_ref()
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Accepted agent types, sorted
    pub fn known_agents(&self) -> Vec<String> {
        self.known_agents.iter().cloned().collect()
    }

    pub fn is_known(&self, agent_type: &str) -> bool {
        self.known_agents.contains(agent_type)
    }

    pub fn timeout_for(&self, agent_type: &str) -> Duration {
        self.timeouts
            .read()
            .map(|t| t.for_agent(agent_type))
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn set_timeout(&self, agent_type: impl Into<String>, timeout: Duration) {
        let agent_type = agent_type.into();
        debug!(%agent_type, ?timeout, "TaskExecutor::set_timeout: called");
        if let Ok(mut timeouts) = self.timeouts.write() {
            timeouts.per_agent.insert(agent_type, timeout);
        }
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        debug!(?timeout, "TaskExecutor::set_default_timeout: called");
        if let Ok(mut timeouts) = self.timeouts.write() {
            timeouts.default = timeout;
        }
    }

    /// Generate a fresh task ID
    pub fn next_task_id(&self) -> String {
        self.ids.next_id()
    }

    /// Execute a task under a newly generated task ID
    pub async fn execute(&self, task: &Task) -> TaskResult {
        let ctx = TaskContext::new(self.next_task_id());
        self.execute_with_context(ctx, task).await
    }

    /// Execute a task under the caller's context
    ///
    /// The agent's timeout is applied on top of any deadline already in `ctx`.
    /// Failures are returned in the result, never as an error.
    pub async fn execute_with_context(&self, ctx: TaskContext, task: &Task) -> TaskResult {
        let started = Instant::now();
        let timeout = self.timeout_for(&task.agent_type);
        let ctx = ctx.with_timeout(timeout);
        let emitter = TaskEmitter::on(self.bus.as_ref(), ctx.task_id(), task.agent_type.as_str());

        info!(
            task_id = %ctx.task_id(),
            agent_type = %task.agent_type,
            ?timeout,
            "TaskExecutor::execute: starting task"
        );
        emitter.task_started(
            &task.prompt,
            task.retry_count,
            task.model_hint.as_deref(),
            task.complexity.as_deref(),
            timeout,
        );

        if !self.is_known(&task.agent_type) {
            let failure = TaskFailure::new(
                Stage::Validation,
                FailureKind::Validation,
                format!(
                    "unknown agent type: {}. Available types: [{}]",
                    task.agent_type,
                    self.known_agents().join(", ")
                ),
            );
            return self.fail(&emitter, task, failure, started);
        }

        let deadline = ctx.deadline().unwrap_or_else(|| started + timeout);
        // A caller deadline earlier than the agent timeout shrinks the budget.
        let budget = Duration::from_millis(millis(deadline.saturating_duration_since(started)));
        match tokio::time::timeout_at(deadline, self.run_stages(&ctx, task, &emitter, started)).await {
            Ok(Ok((output, model))) => {
                let elapsed = started.elapsed();
                info!(
                    task_id = %ctx.task_id(),
                    %model,
                    output_length = output.len(),
                    ?elapsed,
                    "TaskExecutor::execute: task completed"
                );
                emitter.task_completed(output.len(), elapsed, &model);
                TaskResult::success(ctx.task_id(), &task.agent_type, output, model, millis(elapsed))
            }
            Ok(Err(failure)) => self.fail(&emitter, task, failure, started),
            Err(_) => {
                ctx.cancel();
                let failure = TaskFailure::new(
                    Stage::Execution,
                    FailureKind::Timeout,
                    format!("task execution timed out after {budget:?}"),
                );
                self.fail(&emitter, task, failure, started)
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &TaskContext,
        task: &Task,
        emitter: &TaskEmitter,
        started: Instant,
    ) -> Result<(String, String), TaskFailure> {
        emitter.progress(
            Stage::Validation.as_str(),
            "Validating agent type",
            0.1,
            started.elapsed(),
        );

        emitter.progress(
            Stage::PromptLoad.as_str(),
            "Loading agent prompt",
            0.3,
            started.elapsed(),
        );
        let system_prompt = self.prompts.load(&task.agent_type).await.map_err(|e| {
            TaskFailure::new(
                Stage::PromptLoad,
                FailureKind::PromptLoad,
                format!("loading agent prompt: {e}"),
            )
        })?;

        emitter.progress(
            Stage::ModelSelection.as_str(),
            "Selecting model",
            0.5,
            started.elapsed(),
        );
        let model = self.selector.select(task);
        let capabilities = self.selector.capabilities(&model);
        debug!(task_id = %ctx.task_id(), %model, "TaskExecutor::run_stages: model selected");

        emitter.progress(
            Stage::Execution.as_str(),
            &format!("Executing with {model}"),
            0.7,
            started.elapsed(),
        );
        let request = RunRequest {
            agent_type: task.agent_type.clone(),
            model: model.clone(),
            capabilities,
            prompt: format!("{system_prompt}\n\nTask: {}", task.prompt),
            options: task.options.clone(),
        };

        let output = self.runner.run(ctx, request).await.map_err(|e| {
            let kind = match e {
                RunnerError::Cancelled => FailureKind::Cancelled,
                _ => FailureKind::Runner,
            };
            TaskFailure::new(Stage::Execution, kind, format!("executing task: {e}"))
        })?;

        Ok((output, model))
    }

    fn fail(&self, emitter: &TaskEmitter, task: &Task, failure: TaskFailure, started: Instant) -> TaskResult {
        let elapsed = started.elapsed();
        warn!(
            task_id = %emitter.task_id(),
            agent_type = %task.agent_type,
            stage = %failure.stage,
            error = %failure.message,
            "TaskExecutor::execute: task failed"
        );
        emitter.task_failed(failure.stage.as_str(), &failure.message, elapsed, task.retry_count);
        TaskResult::failure(emitter.task_id(), &task.agent_type, failure, millis(elapsed))
    }
}

//! Task, result, and stage types shared by the executor and orchestrator

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of agent work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Which agent handles the task (e.g. "code-implementer")
    #[serde(alias = "agent-type")]
    pub agent_type: String,

    /// Task text appended to the agent's system prompt
    pub prompt: String,

    pub options: TaskOptions,

    /// How many times this task has been retried (drives model escalation)
    #[serde(alias = "retry-count")]
    pub retry_count: u32,

    /// Explicit model override
    #[serde(alias = "model-hint", skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,

    /// Complexity hint ("high", "security", "planning", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
}

impl Task {
    pub fn new(agent_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    pub fn with_complexity(mut self, complexity: impl Into<String>) -> Self {
        self.complexity = Some(complexity.into());
        self
    }

    pub fn with_validation_failed(mut self) -> Self {
        self.options.validation_failed = true;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.extra.insert(key.into(), value);
        self
    }
}

/// Known task options plus opaque pass-through values for the runner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// A previous attempt failed validation; escalates model selection
    #[serde(alias = "validation-failed")]
    pub validation_failed: bool,

    /// Anything else, handed to the runner untouched
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Executor pipeline stages, in order
///
/// The terminal outcome is carried by the `TaskCompleted` / `TaskFailed`
/// events and `TaskResult::failure`, not by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    PromptLoad,
    ModelSelection,
    Execution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PromptLoad => "prompt_load",
            Self::ModelSelection => "model_selection",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown agent type; retrying cannot help
    Validation,
    PromptLoad,
    Timeout,
    /// The runner reported an error
    Runner,
    Cancelled,
    /// The task's unit of work panicked
    Panicked,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation)
    }
}

/// Why a task failed and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Outcome of one task; `failure == None` means success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_type: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

impl TaskResult {
    pub fn success(
        task_id: impl Into<String>,
        agent_type: impl Into<String>,
        output: String,
        model: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            output,
            model: Some(model),
            duration_ms,
            failure: None,
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        agent_type: impl Into<String>,
        failure: TaskFailure,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            output: String::new(),
            model: None,
            duration_ms,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Failure message, empty on success
    pub fn error(&self) -> &str {
        self.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("")
    }
}

/// How a batch is driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk batch: either a bare list of tasks or a `tasks:` key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchFile {
    List(Vec<Task>),
    Keyed { tasks: Vec<Task> },
}

/// Parse a YAML (or JSON) batch document into tasks
pub fn parse_batch(content: &str) -> Result<Vec<Task>, serde_yaml::Error> {
    let batch: BatchFile = serde_yaml::from_str(content)?;
    Ok(match batch {
        BatchFile::List(tasks) | BatchFile::Keyed { tasks } => tasks,
    })
}

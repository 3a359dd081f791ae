//! Event types for task and batch lifecycle streaming
//!
//! These events represent all observable activity in taskrelay:
//! - Task lifecycle (started, stage progress, completed, failed)
//! - Batch lifecycle (started, completed, failed)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable lifecycle record
///
/// `task_id` names the task the event belongs to; batch events carry the
/// batch ID in the same field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(task_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            task_id: task_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Get the event type as a string (for logging)
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Whether this event ends a task or batch
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::TaskCompleted | EventKind::TaskFailed | EventKind::BatchCompleted | EventKind::BatchFailed
        )
    }
}

/// Kind-specific event data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    // === Task Lifecycle ===
    /// A task has been accepted by the executor
    TaskStarted {
        agent_type: String,
        prompt: String,
        retry_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_hint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        complexity: Option<String>,
        timeout_ms: u64,
    },
    /// A task moved to a new stage
    TaskProgress {
        agent_type: String,
        stage: String,
        message: String,
        /// Fraction complete, 0.0 to 1.0
        progress: f64,
        elapsed_ms: u64,
    },
    /// A task produced output
    TaskCompleted {
        agent_type: String,
        output_length: usize,
        duration_ms: u64,
        model: String,
    },
    /// A task failed at some stage
    TaskFailed {
        agent_type: String,
        stage: String,
        error: String,
        duration_ms: u64,
        retry_count: u32,
    },

    // === Batch Lifecycle ===
    BatchStarted {
        mode: String,
        task_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<usize>,
    },
    BatchCompleted {
        mode: String,
        task_count: usize,
        success_count: usize,
        failure_count: usize,
        duration_ms: u64,
    },
    BatchFailed {
        mode: String,
        task_count: usize,
        completed_count: usize,
        error: String,
        duration_ms: u64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskStarted { .. } => EventKind::TaskStarted,
            Self::TaskProgress { .. } => EventKind::TaskProgress,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskFailed { .. } => EventKind::TaskFailed,
            Self::BatchStarted { .. } => EventKind::BatchStarted,
            Self::BatchCompleted { .. } => EventKind::BatchCompleted,
            Self::BatchFailed { .. } => EventKind::BatchFailed,
        }
    }
}

/// Event discriminant used for subscription routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    BatchStarted,
    BatchCompleted,
    BatchFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::TaskStarted,
        EventKind::TaskProgress,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
        EventKind::BatchStarted,
        EventKind::BatchCompleted,
        EventKind::BatchFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStarted => "task.started",
            Self::TaskProgress => "task.progress",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::BatchStarted => "batch.started",
            Self::BatchCompleted => "batch.completed",
            Self::BatchFailed => "batch.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

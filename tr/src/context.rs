//! Request-scoped task context and ID generation
//!
//! A `TaskContext` travels explicitly through every layer of one task's
//! execution: orchestrator → executor → runner. It carries the task ID, the
//! batch it belongs to, the deadline, and a cancellation token the runner
//! must honor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Generates process-unique IDs of the form `{prefix}_{n}_{8-hex}`
///
/// The counter is owned by the generator, not global. If the OS random
/// source fails, IDs fall back to `{prefix}_{n}`, which is still unique
/// per generator.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bytes = [0u8; 4];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => {
                let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("{}_{}_{}", self.prefix, n, suffix)
            }
            Err(e) => {
                warn!(error = %e, "IdGenerator::next_id: random source unavailable, using counter only");
                format!("{}_{}", self.prefix, n)
            }
        }
    }

    /// How many IDs have been issued
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Per-task execution context
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    batch_id: Option<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            batch_id: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Set the deadline, keeping the earlier one if already set
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Context for a sub-operation: same task, same deadline, and a child
    /// token that is cancelled when this one is
    pub fn child(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            batch_id: self.batch_id.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, None when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn cancel(&self) {
        debug!(task_id = %self.task_id, "TaskContext::cancel: called");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("batch_id", &self.batch_id)
            .field("remaining", &self.remaining())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

//! Per-task event emitter

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::bus::EventBus;
use super::types::{Event, EventPayload};

/// Handle for emitting one task's lifecycle events
///
/// TaskEmitter is cheap to clone and fills in the task ID and agent type.
/// All emissions go through `publish_async`, so they never block. A detached
/// emitter (no bus) silently discards everything.
#[derive(Clone)]
pub struct TaskEmitter {
    bus: Option<Arc<EventBus>>,
    task_id: String,
    agent_type: String,
}

impl TaskEmitter {
    pub(crate) fn new(bus: Option<Arc<EventBus>>, task_id: String, agent_type: String) -> Self {
        Self {
            bus,
            task_id,
            agent_type,
        }
    }

    /// Emitter that is not connected to any bus
    pub fn detached(task_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self::new(None, task_id.into(), agent_type.into())
    }

    /// Emitter on an optional bus
    pub fn on(bus: Option<&Arc<EventBus>>, task_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        match bus {
            Some(bus) => bus.emitter_for(task_id, agent_type),
            None => Self::detached(task_id, agent_type),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Queue a payload for this task; false if the event was not accepted
    pub fn emit(&self, payload: EventPayload) -> bool {
        let Some(bus) = &self.bus else {
            return false;
        };
        let event = Event::new(self.task_id.clone(), payload);
        debug!(event_type = event.event_type(), task_id = %self.task_id, "TaskEmitter::emit");
        bus.publish_async(event)
    }

    // === Convenience methods ===

    pub fn task_started(
        &self,
        prompt: &str,
        retry_count: u32,
        model_hint: Option<&str>,
        complexity: Option<&str>,
        timeout: Duration,
    ) -> bool {
        self.emit(EventPayload::TaskStarted {
            agent_type: self.agent_type.clone(),
            prompt: prompt.to_string(),
            retry_count,
            model_hint: model_hint.map(str::to_string),
            complexity: complexity.map(str::to_string),
            timeout_ms: millis(timeout),
        })
    }

    pub fn progress(&self, stage: &str, message: &str, progress: f64, elapsed: Duration) -> bool {
        self.emit(EventPayload::TaskProgress {
            agent_type: self.agent_type.clone(),
            stage: stage.to_string(),
            message: message.to_string(),
            progress: progress.clamp(0.0, 1.0),
            elapsed_ms: millis(elapsed),
        })
    }

    pub fn task_completed(&self, output_length: usize, duration: Duration, model: &str) -> bool {
        self.emit(EventPayload::TaskCompleted {
            agent_type: self.agent_type.clone(),
            output_length,
            duration_ms: millis(duration),
            model: model.to_string(),
        })
    }

    pub fn task_failed(&self, stage: &str, error: &str, duration: Duration, retry_count: u32) -> bool {
        self.emit(EventPayload::TaskFailed {
            agent_type: self.agent_type.clone(),
            stage: stage.to_string(),
            error: error.to_string(),
            duration_ms: millis(duration),
            retry_count,
        })
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! Mock runner
//!
//! Simulates task execution without any external process. Used by the CLI's
//! `--mock` mode and by tests that need deterministic, observable runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RunRequest, RunnerError, TaskRunner};
use crate::context::TaskContext;

/// Runner that sleeps, then returns a canned response
#[derive(Default)]
pub struct MockRunner {
    delay: Duration,
    agent_delays: HashMap<String, Duration>,
    failing_agents: HashSet<String>,
    call_count: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<RunRequest>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated execution time for every task
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Simulated execution time for one agent type
    pub fn with_agent_delay(mut self, agent_type: impl Into<String>, delay: Duration) -> Self {
        self.agent_delays.insert(agent_type.into(), delay);
        self
    }

    /// Make every run for this agent type fail
    pub fn failing_for(mut self, agent_type: impl Into<String>) -> Self {
        self.failing_agents.insert(agent_type.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Most runs that were executing at the same moment
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Deterministic output for a request
    pub fn response_for(request: &RunRequest, delay: Duration) -> String {
        format!(
            "[MOCK] Executed {} agent with prompt length: {} (simulated {}ms)",
            request.agent_type,
            request.prompt.len(),
            delay.as_millis()
        )
    }
}

/// Decrements the in-flight counter however the run ends
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskRunner for MockRunner {
    async fn run(&self, ctx: &TaskContext, request: RunRequest) -> Result<String, RunnerError> {
        debug!(task_id = %ctx.task_id(), agent_type = %request.agent_type, "MockRunner::run: called");
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.agent_delays.get(&request.agent_type).copied().unwrap_or(self.delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancelled() => {
                debug!(task_id = %ctx.task_id(), "MockRunner::run: cancelled");
                return Err(RunnerError::Cancelled);
            }
        }

        if self.failing_agents.contains(&request.agent_type) {
            return Err(RunnerError::Failed(format!("simulated failure for {}", request.agent_type)));
        }

        Ok(Self::response_for(&request, delay))
    }
}

//! Orchestrator - runs batches of tasks
//!
//! A batch runs either strictly in order or with bounded parallelism. In both
//! modes the returned results line up with the input tasks by index, every
//! task's failure stays contained in its own result, and the batch is
//! bracketed by `BatchStarted` and `BatchCompleted` events.
//!
//! A task whose unit of work panics becomes a failed result, the batch
//! publishes `BatchFailed`, and `BatchCompleted` still closes the batch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::context::{IdGenerator, TaskContext};
use crate::domain::{ExecutionMode, FailureKind, Stage, Task, TaskFailure, TaskResult};
use crate::events::{Event, EventBus, EventPayload, millis};
use crate::executor::TaskExecutor;

/// Concurrency used when zero is requested
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parallel limit used by `run`
    pub max_concurrency: usize,

    /// Mode used by `run` when the caller has no preference
    pub default_mode: ExecutionMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_mode: ExecutionMode::Sequential,
        }
    }
}

/// Per-batch bookkeeping
struct Batch {
    id: String,
    mode: ExecutionMode,
    task_count: usize,
    started: Instant,
}

/// Drives batches of tasks through a shared executor
pub struct Orchestrator {
    executor: Arc<TaskExecutor>,
    config: OrchestratorConfig,
    batch_ids: IdGenerator,
}

impl Orchestrator {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self::with_config(executor, OrchestratorConfig::default())
    }

    pub fn with_config(executor: Arc<TaskExecutor>, config: OrchestratorConfig) -> Self {
        debug!(?config, "Orchestrator::with_config: called");
        Self {
            executor,
            config,
            batch_ids: IdGenerator::new("batch"),
        }
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a batch in the given mode, or the configured default
    pub async fn run(&self, tasks: &[Task], mode: Option<ExecutionMode>) -> Vec<TaskResult> {
        match mode.unwrap_or(self.config.default_mode) {
            ExecutionMode::Sequential => self.run_sequential(tasks).await,
            ExecutionMode::Parallel => self.run_parallel(tasks, self.config.max_concurrency).await,
        }
    }

    /// Run tasks one at a time, in order
    pub async fn run_sequential(&self, tasks: &[Task]) -> Vec<TaskResult> {
        let batch = self.begin(ExecutionMode::Sequential, tasks.len(), None);
        let mut results = Vec::with_capacity(tasks.len());
        let mut panicked = 0;

        for (index, task) in tasks.iter().enumerate() {
            let task_id = self.executor.next_task_id();
            let ctx = TaskContext::new(task_id.clone()).with_batch(batch.id.clone());
            debug!(batch_id = %batch.id, index, %task_id, "Orchestrator::run_sequential: running task");

            let outcome = AssertUnwindSafe(self.executor.execute_with_context(ctx, task))
                .catch_unwind()
                .await;
            match outcome {
                Ok(result) => results.push(result),
                Err(_) => {
                    error!(batch_id = %batch.id, index, %task_id, "Orchestrator::run_sequential: task panicked");
                    panicked += 1;
                    results.push(panicked_result(task_id, task));
                }
            }
        }

        self.finish(&batch, &results, panicked);
        results
    }

    /// Run tasks concurrently with at most `max_concurrency` executing at once
    ///
    /// Zero means `DEFAULT_MAX_CONCURRENCY`. Results are index-aligned with
    /// `tasks` regardless of completion order.
    pub async fn run_parallel(&self, tasks: &[Task], max_concurrency: usize) -> Vec<TaskResult> {
        let max_concurrency = if max_concurrency == 0 {
            debug!("Orchestrator::run_parallel: max_concurrency 0, using default");
            DEFAULT_MAX_CONCURRENCY
        } else {
            max_concurrency
        };

        let batch = self.begin(ExecutionMode::Parallel, tasks.len(), Some(max_concurrency));
        let semaphore = Arc::new(Semaphore::new(max_concurrency));

        let task_ids: Vec<String> = tasks.iter().map(|_| self.executor.next_task_id()).collect();
        let handles: Vec<JoinHandle<TaskResult>> = tasks
            .iter()
            .zip(&task_ids)
            .map(|(task, task_id)| {
                let executor = Arc::clone(&self.executor);
                let semaphore = Arc::clone(&semaphore);
                let ctx = TaskContext::new(task_id.clone()).with_batch(batch.id.clone());
                let task = task.clone();

                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let failure = TaskFailure::new(
                                Stage::Execution,
                                FailureKind::Cancelled,
                                "concurrency limiter closed",
                            );
                            return TaskResult::failure(ctx.task_id(), &task.agent_type, failure, 0);
                        }
                    };
                    debug!(task_id = %ctx.task_id(), "Orchestrator::run_parallel: permit acquired");
                    executor.execute_with_context(ctx, &task).await
                })
            })
            .collect();

        // join_all yields outputs in input order, so results[i] belongs to tasks[i].
        let mut results = Vec::with_capacity(tasks.len());
        let mut panicked = 0;
        for (index, outcome) in join_all(handles).await.into_iter().enumerate() {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(batch_id = %batch.id, index, error = %e, "Orchestrator::run_parallel: task unit failed");
                    panicked += 1;
                    results.push(panicked_result(task_ids[index].clone(), &tasks[index]));
                }
            }
        }

        self.finish(&batch, &results, panicked);
        results
    }

    fn begin(&self, mode: ExecutionMode, task_count: usize, max_concurrency: Option<usize>) -> Batch {
        let batch = Batch {
            id: self.batch_ids.next_id(),
            mode,
            task_count,
            started: Instant::now(),
        };
        info!(batch_id = %batch.id, %mode, task_count, ?max_concurrency, "Orchestrator: batch started");

        self.emit(
            &batch.id,
            EventPayload::BatchStarted {
                mode: mode.to_string(),
                task_count,
                max_concurrency,
            },
        );
        batch
    }

    fn finish(&self, batch: &Batch, results: &[TaskResult], panicked: usize) {
        let duration = batch.started.elapsed();
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;

        if panicked > 0 {
            self.emit(
                &batch.id,
                EventPayload::BatchFailed {
                    mode: batch.mode.to_string(),
                    task_count: batch.task_count,
                    completed_count: results.len() - panicked,
                    error: format!("{panicked} task unit(s) panicked"),
                    duration_ms: millis(duration),
                },
            );
        }

        info!(
            batch_id = %batch.id,
            success_count,
            failure_count,
            ?duration,
            "Orchestrator: batch completed"
        );
        self.emit(
            &batch.id,
            EventPayload::BatchCompleted {
                mode: batch.mode.to_string(),
                task_count: batch.task_count,
                success_count,
                failure_count,
                duration_ms: millis(duration),
            },
        );
    }

    fn emit(&self, batch_id: &str, payload: EventPayload) {
        if let Some(bus) = self.executor.bus() {
            bus.publish_async(Event::new(batch_id, payload));
        }
    }

    /// Bus the batch events go to, if any
    pub fn bus(&self) -> Option<&Arc<EventBus>> {
        self.executor.bus()
    }
}

fn panicked_result(task_id: String, task: &Task) -> TaskResult {
    let failure = TaskFailure::new(Stage::Execution, FailureKind::Panicked, "task execution panicked");
    TaskResult::failure(task_id, &task.agent_type, failure, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BusConfig, EventHistory, EventKind};
    use crate::prompts::{PromptError, PromptProvider};
    use crate::runner::{MockRunner, RunRequest, RunnerError, TaskRunner};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticPrompts;

    #[async_trait]
    impl PromptProvider for StaticPrompts {
        async fn load(&self, agent_type: &str) -> Result<String, PromptError> {
            Ok(format!("You are {agent_type}."))
        }
    }

    /// Panics for one agent type, otherwise echoes the prompt
    struct PanickingRunner;

    #[async_trait]
    impl TaskRunner for PanickingRunner {
        async fn run(&self, _ctx: &TaskContext, request: RunRequest) -> Result<String, RunnerError> {
            if request.agent_type == "validation-expert" {
                panic!("runner crashed");
            }
            Ok(request.prompt)
        }
    }

    fn setup(runner: Arc<dyn TaskRunner>) -> (Orchestrator, Arc<EventBus>, Arc<EventHistory>) {
        let bus = Arc::new(EventBus::new(BusConfig {
            workers: 1,
            ..Default::default()
        }));
        let history = Arc::new(EventHistory::new(1000));
        history.attach(&bus);
        let executor = Arc::new(TaskExecutor::new(Arc::new(StaticPrompts), runner).with_bus(Arc::clone(&bus)));
        (Orchestrator::new(executor), bus, history)
    }

    fn mixed_batch() -> Vec<Task> {
        vec![
            Task::new("code-implementer", "one"),
            Task::new("not-an-agent", "two"),
            Task::new("sprint-planner", "three"),
        ]
    }

    #[tokio::test]
    async fn test_sequential_counts_and_events() {
        let (orchestrator, bus, history) = setup(Arc::new(MockRunner::new()));

        let results = orchestrator.run_sequential(&mixed_batch()).await;
        bus.close().await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());

        let batch_events = history.of_kind(EventKind::BatchCompleted);
        assert_eq!(batch_events.len(), 1);
        match &batch_events[0].payload {
            EventPayload::BatchCompleted {
                success_count,
                failure_count,
                mode,
                ..
            } => {
                assert_eq!(*success_count, 2);
                assert_eq!(*failure_count, 1);
                assert_eq!(mode, "sequential");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(history.of_kind(EventKind::BatchStarted).len(), 1);
        assert!(history.of_kind(EventKind::BatchFailed).is_empty());
    }

    #[tokio::test]
    async fn test_parallel_results_are_index_aligned() {
        // Earlier tasks take longer, so completion order is reversed
        let runner = MockRunner::new()
            .with_agent_delay("code-implementer", Duration::from_millis(60))
            .with_agent_delay("sprint-planner", Duration::from_millis(30))
            .with_agent_delay("test-specialist", Duration::from_millis(1));
        let (orchestrator, bus, _history) = setup(Arc::new(runner));

        let tasks = vec![
            Task::new("code-implementer", "a"),
            Task::new("sprint-planner", "b"),
            Task::new("test-specialist", "c"),
        ];
        let results = orchestrator.run_parallel(&tasks, 3).await;
        bus.close().await.unwrap();

        assert_eq!(results.len(), 3);
        for (task, result) in tasks.iter().zip(&results) {
            assert_eq!(result.agent_type, task.agent_type);
            assert!(result.is_success());
        }
    }

    #[tokio::test]
    async fn test_parallel_respects_concurrency_limit() {
        let runner = Arc::new(MockRunner::new().with_delay(Duration::from_millis(20)));
        let (orchestrator, bus, _history) = setup(runner.clone());

        let tasks: Vec<_> = (0..12).map(|i| Task::new("code-implementer", format!("task {i}"))).collect();
        let results = orchestrator.run_parallel(&tasks, 3).await;
        bus.close().await.unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(runner.call_count(), 12);
        assert!(runner.peak_concurrency() <= 3, "peak was {}", runner.peak_concurrency());
    }

    #[tokio::test]
    async fn test_parallel_zero_concurrency_uses_default() {
        let (orchestrator, bus, history) = setup(Arc::new(MockRunner::new()));

        orchestrator.run_parallel(&mixed_batch(), 0).await;
        bus.close().await.unwrap();

        match &history.of_kind(EventKind::BatchStarted)[0].payload {
            EventPayload::BatchStarted { max_concurrency, .. } => {
                assert_eq!(*max_concurrency, Some(DEFAULT_MAX_CONCURRENCY));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parallel_single_permit_matches_sequential() {
        let (orchestrator, bus, _history) = setup(Arc::new(MockRunner::new()));

        let sequential = orchestrator.run_sequential(&mixed_batch()).await;
        let parallel = orchestrator.run_parallel(&mixed_batch(), 1).await;
        bus.close().await.unwrap();

        let summarize = |results: &[TaskResult]| {
            results
                .iter()
                .map(|r| (r.agent_type.clone(), r.output.clone(), r.error().to_string(), r.model.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summarize(&sequential), summarize(&parallel));
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let (orchestrator, bus, history) = setup(Arc::new(PanickingRunner));

        let tasks = vec![
            Task::new("code-implementer", "fine"),
            Task::new("validation-expert", "explodes"),
            Task::new("test-specialist", "also fine"),
        ];
        let results = orchestrator.run_parallel(&tasks, 2).await;
        let sequential = orchestrator.run_sequential(&tasks).await;
        bus.close().await.unwrap();

        for results in [&results, &sequential] {
            assert_eq!(results.len(), 3);
            assert!(results[0].is_success());
            assert_eq!(results[1].failure.as_ref().unwrap().kind, FailureKind::Panicked);
            assert!(results[2].is_success());
        }

        assert_eq!(history.of_kind(EventKind::BatchFailed).len(), 2);
        assert_eq!(history.of_kind(EventKind::BatchCompleted).len(), 2);
    }

    #[tokio::test]
    async fn test_run_uses_configured_mode() {
        let runner = Arc::new(MockRunner::new().with_delay(Duration::from_millis(10)));
        let bus = Arc::new(EventBus::with_defaults());
        let history = Arc::new(EventHistory::new(100));
        history.attach(&bus);
        let executor = Arc::new(TaskExecutor::new(Arc::new(StaticPrompts), runner).with_bus(Arc::clone(&bus)));
        let orchestrator = Orchestrator::with_config(
            executor,
            OrchestratorConfig {
                max_concurrency: 2,
                default_mode: ExecutionMode::Parallel,
            },
        );

        orchestrator.run(&mixed_batch(), None).await;
        orchestrator.run(&mixed_batch(), Some(ExecutionMode::Sequential)).await;
        bus.close().await.unwrap();

        let modes: Vec<_> = history
            .of_kind(EventKind::BatchStarted)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::BatchStarted { mode, .. } => Some(mode),
                _ => None,
            })
            .collect();
        assert_eq!(modes.len(), 2);
        assert!(modes.contains(&"parallel".to_string()));
        assert!(modes.contains(&"sequential".to_string()));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (orchestrator, bus, history) = setup(Arc::new(MockRunner::new()));

        assert!(orchestrator.run_parallel(&[], 4).await.is_empty());
        assert!(orchestrator.run_sequential(&[]).await.is_empty());
        bus.close().await.unwrap();

        assert_eq!(history.of_kind(EventKind::BatchCompleted).len(), 2);
    }
}

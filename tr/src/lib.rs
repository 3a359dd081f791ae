//! TaskRelay - bounded-concurrency agent task orchestrator
//!
//! TaskRelay runs batches of agent tasks either one after another or in
//! parallel under a concurrency limit, publishing every lifecycle step as an
//! event on an in-process bus that any number of observers can subscribe to.
//!
//! # Core Concepts
//!
//! - **Stages**: each task moves through validation, prompt load, model
//!   selection, and execution, with a progress event per stage
//! - **Contained Failures**: a failing or panicking task produces a failed
//!   result; the rest of the batch keeps going
//! - **Fire-and-Forget Events**: async publishing never blocks, and drops
//!   events when the lock-free buffer is full
//!
//! # Modules
//!
//! - [`events`] - Ring buffer, event bus, emitters, and history
//! - [`executor`] - Per-task stage pipeline and model selection
//! - [`orchestrator`] - Sequential and bounded-parallel batches
//! - [`runner`] - Backends that actually perform a task
//! - [`prompts`] - Agent system prompt loading
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod prompts;
pub mod runner;

// Re-export commonly used types
pub use config::Config;
pub use context::{IdGenerator, TaskContext};
pub use domain::{ExecutionMode, FailureKind, Stage, Task, TaskFailure, TaskOptions, TaskResult, parse_batch};
pub use events::{
    BusConfig, BusError, BusStats, Event, EventBus, EventHistory, EventKind, EventPayload, RingBuffer, SubscriptionId,
    TaskEmitter, create_event_bus,
};
pub use executor::{ModelSelector, TaskExecutor, TimeoutConfig};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use prompts::{PromptError, PromptLoader, PromptProvider};
pub use runner::{CommandRunner, MockRunner, RunRequest, RunnerError, TaskRunner};

//! Task execution
//!
//! [`TaskExecutor`] drives a single task through its stages, choosing a model
//! with [`ModelSelector`] and handing the work to a [`crate::runner::TaskRunner`].

mod adapter;
mod model;

pub use adapter::{DEFAULT_AGENT_TYPES, DEFAULT_TIMEOUT, TaskExecutor, TimeoutConfig};
pub use model::{DEFAULT_MODEL, ModelCapabilities, ModelSelector};

//! Task runners: the external execution collaborator
//!
//! A runner receives the resolved model and full prompt for one task and
//! returns its output. `MockRunner` simulates execution; `CommandRunner`
//! hands the task to an external program.

mod client;
mod command;
mod error;
mod mock;

pub use client::{RunRequest, TaskRunner};
pub use command::CommandRunner;
pub use error::RunnerError;
pub use mock::MockRunner;

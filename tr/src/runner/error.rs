//! Runner error types

use std::io;

use thiserror::Error;

/// Errors from task runners
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("spawning {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("runner I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid runner response: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RunnerError::Failed(_) => true,
            RunnerError::Cancelled => false,
            RunnerError::Spawn { .. } => false,
            RunnerError::Io(_) => true,
            RunnerError::Protocol(_) => false,
            RunnerError::Json(_) => false,
        }
    }
}

//! Subprocess runner
//!
//! Spawns a configured program per task, writes the `RunRequest` as JSON on
//! its stdin, and reads the result from stdout. The program may answer with
//! `{"success": bool, "output": "...", "error": "..."}` or with plain text.
//! The child is killed if the task is cancelled.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{RunRequest, RunnerError, TaskRunner};
use crate::context::TaskContext;

#[derive(Debug, Deserialize)]
struct CommandResponse {
    success: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
}

/// Runner that delegates each task to an external program
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(&self, ctx: &TaskContext, request: RunRequest) -> Result<String, RunnerError> {
        debug!(task_id = %ctx.task_id(), program = %self.program, "CommandRunner::run: called");

        let payload = serde_json::to_vec(&request)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("TASKRELAY_TASK_ID", ctx.task_id())
            .env("TASKRELAY_MODEL", &request.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Protocol("child stdin unavailable".to_string()))?;

        // Feed stdin while collecting stdout so a child that echoes as it reads
        // never blocks on a full pipe.
        let exchange = async move {
            let feed = async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            };
            match tokio::join!(feed, child.wait_with_output()) {
                (_, Err(e)) => Err(e),
                // The child may exit without consuming its input.
                (Err(e), _) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                (_, Ok(output)) => Ok(output),
            }
        };

        // Dropping the exchange future drops the child, which kills it.
        let output = tokio::select! {
            result = exchange => result?,
            _ = ctx.cancelled() => {
                warn!(task_id = %ctx.task_id(), "CommandRunner::run: cancelled, killing child");
                return Err(RunnerError::Cancelled);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(RunnerError::Failed(message));
        }

        match serde_json::from_str::<CommandResponse>(&stdout) {
            Ok(response) if response.success => Ok(response.output),
            Ok(response) => Err(RunnerError::Failed(response.error)),
            Err(_) => {
                debug!("CommandRunner::run: response is not JSON, using raw stdout");
                Ok(stdout)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::TaskOptions;
    use crate::executor::ModelSelector;
    use std::time::Duration;

    fn request() -> RunRequest {
        RunRequest {
            agent_type: "code-implementer".to_string(),
            model: "claude-4-opus".to_string(),
            capabilities: ModelSelector::new().capabilities("claude-4-opus"),
            prompt: "system\n\nTask: build".to_string(),
            options: TaskOptions::default(),
        }
    }

    fn sh(script: &str) -> CommandRunner {
        CommandRunner::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_plain_text_output() {
        let runner = sh("cat > /dev/null; echo hello from agent");
        let output = runner.run(&TaskContext::new("task_1"), request()).await.unwrap();
        assert_eq!(output, "hello from agent");
    }

    #[tokio::test]
    async fn test_json_response() {
        let runner = sh(r#"cat > /dev/null; echo '{"success": true, "output": "built"}'"#);
        let output = runner.run(&TaskContext::new("task_1"), request()).await.unwrap();
        assert_eq!(output, "built");

        let runner = sh(r#"cat > /dev/null; echo '{"success": false, "error": "compile error"}'"#);
        let err = runner.run(&TaskContext::new("task_1"), request()).await.unwrap_err();
        assert_eq!(err.to_string(), "task failed: compile error");
    }

    #[tokio::test]
    async fn test_request_is_written_to_stdin() {
        let runner = sh("cat");
        let output = runner.run(&TaskContext::new("task_1"), request()).await.unwrap();
        let echoed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(echoed["model"], "claude-4-opus");
        assert_eq!(echoed["capabilities"]["reasoning_level"], "maximum");
    }

    #[tokio::test]
    async fn test_large_payload_is_echoed_without_deadlock() {
        let runner = sh("cat");
        let mut req = request();
        req.prompt = "x".repeat(1024 * 1024);

        let output = tokio::time::timeout(Duration::from_secs(10), runner.run(&TaskContext::new("task_1"), req))
            .await
            .expect("runner deadlocked on a full pipe")
            .unwrap();
        let echoed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(echoed["prompt"].as_str().unwrap().len(), 1024 * 1024);
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_succeeds() {
        let runner = sh("echo done");
        let mut req = request();
        req.prompt = "y".repeat(1024 * 1024);

        let output = runner.run(&TaskContext::new("task_1"), req).await.unwrap();
        assert_eq!(output, "done");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let runner = sh("cat > /dev/null; echo broken >&2; exit 3");
        let err = runner.run(&TaskContext::new("task_1"), request()).await.unwrap_err();
        assert_eq!(err.to_string(), "task failed: broken");
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let runner = sh("sleep 30");
        let ctx = TaskContext::new("task_1");
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run(&ctx, request()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = CommandRunner::new("definitely-not-a-real-program-xyz", vec![]);
        let err = runner.run(&TaskContext::new("task_1"), request()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}

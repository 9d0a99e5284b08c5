use async_trait::async_trait;
use std::sync::Arc;

use sdk::{FailureKind, Worker, WorkerKind, WorkerResponse};

use crate::llm::strip_code_fences;
use crate::sandbox::{SandboxExecutor, SandboxOutcome};

/// Runs code in the sandbox
pub struct ExecWorker {
    sandbox: Arc<SandboxExecutor>,
}

impl ExecWorker {
    pub const NAME: &'static str = "ExecWorker";

    pub fn new(sandbox: Arc<SandboxExecutor>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.sandbox
    }
}

#[async_trait]
impl Worker for ExecWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Exec
    }

    async fn execute(&self, task: &str) -> WorkerResponse {
        let code = strip_code_fences(task);
        let outcome = self.sandbox.run(&code).await;
        let diagnostic = outcome.diagnostic();

        match outcome {
            SandboxOutcome::SafetyRejected { pattern } => WorkerResponse::error(
                Self::NAME,
                task,
                FailureKind::SafetyRejected,
                diagnostic.unwrap_or_default(),
            )
            .with_metadata("outcome", "safety_rejected")
            .with_metadata("pattern", pattern),

            SandboxOutcome::TimedOut { limit, .. } => WorkerResponse::error(
                Self::NAME,
                task,
                FailureKind::TimedOut,
                diagnostic.unwrap_or_default(),
            )
            .with_metadata("outcome", "timed_out")
            .with_metadata("timeout_secs", limit.as_secs_f64()),

            SandboxOutcome::SpawnFailed { reason } => WorkerResponse::error(
                Self::NAME,
                task,
                FailureKind::SpawnFailed,
                diagnostic.unwrap_or_default(),
            )
            .with_metadata("outcome", "spawn_failed")
            .with_metadata("reason", reason),

            SandboxOutcome::Completed(output) => {
                let response = if output.is_clean() {
                    WorkerResponse::success(Self::NAME, task, output.stdout.clone())
                } else {
                    WorkerResponse::error(
                        Self::NAME,
                        task,
                        FailureKind::Runtime,
                        output.stderr.clone(),
                    )
                };

                response
                    .with_metadata("outcome", "completed")
                    .with_metadata("stdout", output.stdout)
                    .with_metadata("stderr", output.stderr)
                    .with_metadata("exit_code", output.exit_code)
                    .with_metadata("execution_time_ms", output.duration.as_millis() as u64)
                    .with_metadata("truncated", output.stdout_truncated || output.stderr_truncated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shell_worker(timeout: Duration) -> ExecWorker {
        ExecWorker::new(Arc::new(SandboxExecutor::new("sh", timeout, 1000)))
    }

    #[tokio::test]
    async fn test_rejected_code_reports_safety_outcome() {
        let worker = shell_worker(Duration::from_secs(5));
        let response = worker.execute("import os\nprint(1)").await;

        assert!(!response.is_success());
        assert_eq!(response.failure_kind(), Some(FailureKind::SafetyRejected));
        assert_eq!(response.metadata["outcome"], "safety_rejected");
        assert_eq!(worker.sandbox().spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_run_is_success() {
        let worker = shell_worker(Duration::from_secs(10));
        let response = worker.execute("echo hello").await;

        assert!(response.is_success(), "{:?}", response);
        assert_eq!(response.result, "hello\n");
        assert_eq!(response.metadata["outcome"], "completed");
        assert_eq!(response.metadata["exit_code"], 0);
        assert_eq!(response.metadata["truncated"], false);
    }

    #[tokio::test]
    async fn test_stderr_makes_runtime_error() {
        let worker = shell_worker(Duration::from_secs(10));
        let response = worker.execute("echo partial; echo boom 1>&2").await;

        assert!(!response.is_success());
        assert_eq!(response.failure_kind(), Some(FailureKind::Runtime));
        assert_eq!(response.result, "boom\n");
        assert_eq!(response.metadata["stdout"], "partial\n");
    }

    #[tokio::test]
    async fn test_timeout_reports_timed_out() {
        let worker = shell_worker(Duration::from_secs(1));
        let response = worker.execute("sleep 5").await;

        assert_eq!(response.failure_kind(), Some(FailureKind::TimedOut));
        assert_eq!(response.result, "Code execution timeout (>1s)");
        assert_eq!(response.metadata["outcome"], "timed_out");
    }
}

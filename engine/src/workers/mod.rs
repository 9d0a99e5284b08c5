//! Worker implementations
//!
//! Each worker wraps one capability behind [`sdk::Worker`]:
//!
//! - [`SearchWorker`]: web search through a [`SearchProvider`](crate::search::SearchProvider)
//! - [`CodeGenWorker`]: code generation through a [`GenerationProvider`](crate::llm::GenerationProvider)
//! - [`ExecWorker`]: sandboxed execution through [`SandboxExecutor`](crate::sandbox::SandboxExecutor)
//!
//! [`WorkerSet`] holds one worker per [`WorkerKind`] and is what the
//! orchestrator dispatches through.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use sdk::{FailureKind, Worker, WorkerKind, WorkerResponse};

use crate::llm::ProviderError;

pub mod codegen;
pub mod exec;
pub mod search;

pub use codegen::CodeGenWorker;
pub use exec::ExecWorker;
pub use search::SearchWorker;

/// One worker per kind
#[derive(Clone)]
pub struct WorkerSet {
    search: Arc<dyn Worker>,
    codegen: Arc<dyn Worker>,
    exec: Arc<dyn Worker>,
}

impl WorkerSet {
    pub fn new(search: Arc<dyn Worker>, codegen: Arc<dyn Worker>, exec: Arc<dyn Worker>) -> Self {
        Self {
            search,
            codegen,
            exec,
        }
    }

    /// Worker registered for `kind`
    pub fn get(&self, kind: WorkerKind) -> &Arc<dyn Worker> {
        match kind {
            WorkerKind::Search => &self.search,
            WorkerKind::CodeGen => &self.codegen,
            WorkerKind::Exec => &self.exec,
        }
    }

    /// Names of all registered workers in kind order
    pub fn names(&self) -> Vec<String> {
        WorkerKind::ALL
            .iter()
            .map(|kind| self.get(*kind).name().to_string())
            .collect()
    }
}

/// Run `worker` on `task`, turning a panic inside the worker into an
/// Error-status response
pub async fn invoke(worker: &Arc<dyn Worker>, task: &str) -> WorkerResponse {
    match AssertUnwindSafe(worker.execute(task)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("{} panicked: {}", worker.name(), detail);
            WorkerResponse::error(
                worker.name(),
                task,
                FailureKind::Internal,
                format!("{} failed unexpectedly: {}", worker.name(), detail),
            )
        }
    }
}

/// Progress line emitted while a worker is busy with `task`
pub fn thinking_message(kind: WorkerKind, task: &str) -> String {
    match kind {
        WorkerKind::Search => format!("Analyzing search query: {}", task),
        WorkerKind::CodeGen => format!("Planning code structure for: {}", task),
        WorkerKind::Exec => format!("Preparing to execute: {}", task),
    }
}

/// Convert a provider failure into an Error-status response.
///
/// Missing credentials get a fixed configuration diagnostic; everything else
/// keeps the provider's message.
pub(crate) fn provider_failure(worker: &str, task: &str, err: ProviderError) -> WorkerResponse {
    match err {
        ProviderError::MissingCredential(var) => WorkerResponse::error(
            worker,
            task,
            FailureKind::Configuration,
            format!("{} is not configured: set the {} environment variable", worker, var),
        ),
        other => {
            tracing::warn!("{} provider call failed: {}", worker, other);
            WorkerResponse::error(worker, task, FailureKind::Provider, other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_messages() {
        assert_eq!(
            thinking_message(WorkerKind::Search, "rust"),
            "Analyzing search query: rust"
        );
        assert_eq!(
            thinking_message(WorkerKind::Exec, "print(1)"),
            "Preparing to execute: print(1)"
        );
    }

    #[test]
    fn test_missing_credential_is_configuration_failure() {
        let response = provider_failure(
            "SearchWorker",
            "rust",
            ProviderError::MissingCredential("SERPAPI_API_KEY".to_string()),
        );
        assert!(!response.is_success());
        assert_eq!(response.failure_kind(), Some(FailureKind::Configuration));
        assert!(response.result.contains("SERPAPI_API_KEY"));
    }

    struct PanickingWorker;

    #[async_trait::async_trait]
    impl Worker for PanickingWorker {
        fn name(&self) -> &str {
            "PanickingWorker"
        }

        fn kind(&self) -> WorkerKind {
            WorkerKind::Search
        }

        async fn execute(&self, _task: &str) -> WorkerResponse {
            panic!("index out of range")
        }
    }

    #[tokio::test]
    async fn test_invoke_converts_panic() {
        let worker: Arc<dyn Worker> = Arc::new(PanickingWorker);
        let response = invoke(&worker, "boom").await;

        assert!(!response.is_success());
        assert_eq!(response.failure_kind(), Some(FailureKind::Internal));
        assert!(response.result.contains("index out of range"));
    }

    #[test]
    fn test_network_failure_is_provider_failure() {
        let response = provider_failure("CodeGenWorker", "x", ProviderError::Timeout);
        assert_eq!(response.failure_kind(), Some(FailureKind::Provider));
        assert_eq!(response.result, "Timeout");
    }
}

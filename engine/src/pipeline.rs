//! Search → CodeGen → Exec pipeline
//!
//! Stage 2 receives a prompt built from the search result. Stage 3 only runs
//! when code generation succeeded. Each stage that ran is written to memory
//! under the original task text as soon as it finishes, so a later failure
//! never loses an earlier stage.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use sdk::{WorkerKind, WorkerResponse};

use crate::memory::{MemoryError, MemoryStore};
use crate::workers::{self, WorkerSet};

/// Prompt handed to the code generation stage
pub fn codegen_prompt(search_result: &str) -> String {
    format!("Generate Python code based on: {}", search_result)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub status: String,
    pub task: String,
    pub steps: Vec<WorkerResponse>,
    pub final_result: String,
}

impl PipelineReport {
    /// Kind of the last stage that ran
    pub fn final_kind(&self) -> WorkerKind {
        match self.steps.len() {
            0 | 1 => WorkerKind::Search,
            2 => WorkerKind::CodeGen,
            _ => WorkerKind::Exec,
        }
    }
}

pub struct Pipeline {
    workers: WorkerSet,
    memory: Arc<MemoryStore>,
}

impl Pipeline {
    pub fn new(workers: WorkerSet, memory: Arc<MemoryStore>) -> Self {
        Self { workers, memory }
    }

    pub async fn run(&self, task: &str) -> Result<PipelineReport, MemoryError> {
        info!("Pipeline started: {}", task);
        let mut steps = Vec::with_capacity(3);

        let search = self.run_stage(WorkerKind::Search, task, task).await?;
        let prompt = codegen_prompt(&search.result);
        steps.push(search);

        let code = self.run_stage(WorkerKind::CodeGen, &prompt, task).await?;
        let code_ok = code.is_success();
        let code_text = code.result.clone();
        steps.push(code);

        if code_ok {
            let exec = self.run_stage(WorkerKind::Exec, &code_text, task).await?;
            steps.push(exec);
        } else {
            debug!("Code generation failed, skipping execution stage");
        }

        let final_result = steps.last().map(|s| s.result.clone()).unwrap_or_default();
        info!("Pipeline finished with {} steps", steps.len());

        Ok(PipelineReport {
            status: "success".to_string(),
            task: task.to_string(),
            steps,
            final_result,
        })
    }

    async fn run_stage(
        &self,
        kind: WorkerKind,
        input: &str,
        original_task: &str,
    ) -> Result<WorkerResponse, MemoryError> {
        let response = workers::invoke(self.workers.get(kind), input).await;
        debug!("Pipeline stage {} finished: {}", kind, response.status.as_str());

        self.memory
            .store(
                original_task,
                &response.worker_name,
                &response.result,
                &response.metadata,
            )
            .await?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HashingEmbedder, MemoryLog, SqliteVectorIndex};
    use async_trait::async_trait;
    use sdk::{FailureKind, Worker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted worker that records the inputs it saw
    struct ScriptedWorker {
        name: &'static str,
        kind: WorkerKind,
        succeed: bool,
        output: &'static str,
        calls: AtomicUsize,
        inputs: Mutex<Vec<String>>,
    }

    impl ScriptedWorker {
        fn new(name: &'static str, kind: WorkerKind, succeed: bool, output: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind,
                succeed,
                output,
                calls: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> WorkerKind {
            self.kind
        }

        async fn execute(&self, task: &str) -> WorkerResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(task.to_string());
            if self.succeed {
                WorkerResponse::success(self.name, task, self.output)
            } else {
                WorkerResponse::error(self.name, task, FailureKind::Provider, self.output)
            }
        }
    }

    async fn memory(dir: &TempDir) -> Arc<MemoryStore> {
        let log = MemoryLog::open(&dir.path().join("memory.db")).await.unwrap();
        let index = SqliteVectorIndex::open(&dir.path().join("index"), Arc::new(HashingEmbedder::new(64)))
            .await
            .unwrap();
        Arc::new(MemoryStore::new(log, Arc::new(index)))
    }

    #[test]
    fn test_codegen_prompt() {
        assert_eq!(
            codegen_prompt("Found 2 results for: sorting"),
            "Generate Python code based on: Found 2 results for: sorting"
        );
    }

    #[tokio::test]
    async fn test_full_pipeline_runs_three_stages() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir).await;

        let search = ScriptedWorker::new("SearchWorker", WorkerKind::Search, true, "Found 1 results for: primes");
        let codegen = ScriptedWorker::new("CodeGenWorker", WorkerKind::CodeGen, true, "print(2)");
        let exec = ScriptedWorker::new("ExecWorker", WorkerKind::Exec, true, "2\n");

        let pipeline = Pipeline::new(
            WorkerSet::new(Arc::clone(&search) as _, Arc::clone(&codegen) as _, Arc::clone(&exec) as _),
            Arc::clone(&memory),
        );
        let report = pipeline.run("primes").await.unwrap();

        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.final_result, "2\n");
        assert_eq!(report.final_kind(), WorkerKind::Exec);
        assert_eq!(
            codegen.inputs.lock().unwrap()[0],
            "Generate Python code based on: Found 1 results for: primes"
        );
        assert_eq!(exec.inputs.lock().unwrap()[0], "print(2)");

        let history = memory.history(10, 0).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.task == "primes"));
    }

    #[tokio::test]
    async fn test_codegen_failure_skips_exec() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir).await;

        let search = ScriptedWorker::new("SearchWorker", WorkerKind::Search, true, "Found 0 results for: x");
        let codegen = ScriptedWorker::new("CodeGenWorker", WorkerKind::CodeGen, false, "provider down");
        let exec = ScriptedWorker::new("ExecWorker", WorkerKind::Exec, true, "never");

        let pipeline = Pipeline::new(
            WorkerSet::new(Arc::clone(&search) as _, Arc::clone(&codegen) as _, Arc::clone(&exec) as _),
            Arc::clone(&memory),
        );
        let report = pipeline.run("x").await.unwrap();

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.final_result, "provider down");
        assert_eq!(report.final_kind(), WorkerKind::CodeGen);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);

        let history = memory.history(10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].worker_name, "CodeGenWorker");
        assert_eq!(history[1].worker_name, "SearchWorker");
        assert!(history.iter().all(|r| r.task == "x"));
    }
}

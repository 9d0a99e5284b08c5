//! Orchestrator
//!
//! Composition root owning the worker set, memory store, execution history and
//! pipeline. One instance is built at startup and shared (behind an `Arc`)
//! with the CLI and the HTTP transport.
//!
//! Worker failures arrive as Error-status responses and are returned as
//! ordinary results. Only the orchestrator's own failures (an unknown worker
//! kind, an unreachable memory log) become an [`ErrorEnvelope`].

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use sdk::{EngineError, WorkerKind, WorkerResponse};

use crate::config::Config;
use crate::history::{ExecutionHistory, ExecutionRecord};
use crate::llm::{self, GenerationProvider};
use crate::memory::{IndexedDocument, MemoryRecord, MemoryStats, MemoryStore, RecallHit};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::router::TaskRouter;
use crate::sandbox::SandboxExecutor;
use crate::search::{self, SearchProvider};
use crate::workers::{self, CodeGenWorker, ExecWorker, SearchWorker, WorkerSet};

/// Successful single-task result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub status: String,
    pub orchestration: Orchestration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Orchestration {
    pub task: String,
    pub worker_kind: WorkerKind,
    pub worker_response: WorkerResponse,
}

/// Top-level failure returned to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub status: String,
    pub message: String,
    pub task: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            task: task.into(),
        }
    }
}

/// Either a payload or an error envelope, serialized without a wrapper
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Ok(T),
    Error(ErrorEnvelope),
}

impl<T> Reply<T> {
    pub(crate) fn from_result(result: Result<T, EngineError>, task: &str) -> Self {
        match result {
            Ok(payload) => Reply::Ok(payload),
            Err(e) => {
                warn!("Request for '{}' failed: {}", task, e);
                Reply::Error(ErrorEnvelope::new(e.to_string(), task))
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallReport {
    pub query: String,
    pub relevant_memories: Vec<RecallHit>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage<T> {
    pub history: Vec<T>,
    pub count: usize,
}

impl<T> HistoryPage<T> {
    fn new(history: Vec<T>) -> Self {
        let count = history.len();
        Self { history, count }
    }
}

/// Raw index documents in insertion order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryListing {
    pub memories: Vec<IndexedDocument>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearReport {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub capability: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub status: String,
    pub workers: Vec<String>,
    pub memory_stats: MemoryStats,
    pub execution_history_count: usize,
    pub providers: Vec<ProviderHealth>,
    pub version: String,
}

pub struct Orchestrator {
    router: TaskRouter,
    workers: WorkerSet,
    memory: Arc<MemoryStore>,
    history: ExecutionHistory,
    pipeline: Pipeline,
    recall_k: usize,
    generation: Option<Arc<dyn GenerationProvider>>,
    search: Option<Arc<dyn SearchProvider>>,
}

impl Orchestrator {
    pub fn new(workers: WorkerSet, memory: Arc<MemoryStore>, history: ExecutionHistory) -> Self {
        let pipeline = Pipeline::new(workers.clone(), Arc::clone(&memory));
        Self {
            router: TaskRouter::new(),
            workers,
            memory,
            history,
            pipeline,
            recall_k: 5,
            generation: None,
            search: None,
        }
    }

    /// Number of hits returned by `recall_context`
    pub fn with_recall_k(mut self, k: usize) -> Self {
        self.recall_k = k;
        self
    }

    /// Providers reported in `agent_status`
    pub fn with_providers(
        mut self,
        generation: Arc<dyn GenerationProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        self.generation = Some(generation);
        self.search = Some(search);
        self
    }

    /// Build the full stack from config: providers, sandbox, workers, memory
    pub async fn from_config(config: &Config) -> Result<Self, EngineError> {
        let generation = llm::build_provider(&config.generation)?;
        let search = search::build_provider(&config.search)?;
        let sandbox = Arc::new(SandboxExecutor::from_config(&config.sandbox));

        let workers = WorkerSet::new(
            Arc::new(SearchWorker::new(Arc::clone(&search))),
            Arc::new(CodeGenWorker::new(Arc::clone(&generation))),
            Arc::new(ExecWorker::new(sandbox)),
        );

        let memory = Arc::new(MemoryStore::open(config).await?);
        let history = ExecutionHistory::new(config.history.max_entries);

        info!(
            "Orchestrator ready (generation={}, search={}, interpreter={})",
            generation.name(),
            search.name(),
            config.sandbox.interpreter
        );

        Ok(Self::new(workers, memory, history)
            .with_recall_k(config.memory.recall_k)
            .with_providers(generation, search))
    }

    /// Kind that would handle `task` when none is given
    pub fn route(&self, task: &str) -> WorkerKind {
        self.router.classify(task)
    }

    /// Run one task on the given or routed worker, then record it
    pub async fn execute_task(
        &self,
        task: &str,
        kind: Option<WorkerKind>,
    ) -> Result<TaskOutcome, EngineError> {
        let kind = kind.unwrap_or_else(|| self.route(task));
        info!("Executing task with {} worker", kind);

        let response = workers::invoke(self.workers.get(kind), task).await;

        self.memory
            .store(task, &response.worker_name, &response.result, &response.metadata)
            .await?;
        self.history
            .append(ExecutionRecord::new(task, kind, response.clone()));

        Ok(TaskOutcome {
            status: "success".to_string(),
            orchestration: Orchestration {
                task: task.to_string(),
                worker_kind: kind,
                worker_response: response,
            },
        })
    }

    /// `execute_task` for transports that pass the kind as text
    pub async fn execute_task_request(&self, task: &str, kind: Option<&str>) -> Reply<TaskOutcome> {
        let kind = match kind.map(|k| k.parse::<WorkerKind>()).transpose() {
            Ok(kind) => kind,
            Err(e) => return Reply::from_result(Err(e), task),
        };
        Reply::from_result(self.execute_task(task, kind).await, task)
    }

    /// Run the Search → CodeGen → Exec pipeline
    pub async fn execute_pipeline_task(&self, task: &str) -> Result<PipelineReport, EngineError> {
        let report = self.pipeline.run(task).await?;

        if let Some(last) = report.steps.last() {
            self.history.append(
                ExecutionRecord::new(task, report.final_kind(), last.clone()).from_pipeline(),
            );
        }
        Ok(report)
    }

    pub async fn execute_pipeline_request(&self, task: &str) -> Reply<PipelineReport> {
        Reply::from_result(self.execute_pipeline_task(task).await, task)
    }

    pub async fn recall_context(&self, query: &str) -> Result<RecallReport, EngineError> {
        let memories = self.memory.recall(query, self.recall_k).await?;
        Ok(RecallReport {
            query: query.to_string(),
            count: memories.len(),
            relevant_memories: memories,
        })
    }

    /// Memory log, newest first
    pub async fn conversation_history(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<HistoryPage<MemoryRecord>, EngineError> {
        Ok(HistoryPage::new(self.memory.history(limit, offset).await?))
    }

    /// In-process execution records, oldest first
    pub fn execution_history(&self, limit: usize) -> HistoryPage<ExecutionRecord> {
        HistoryPage::new(self.history.recent(limit))
    }

    /// Every indexed document, up to `limit`
    pub async fn all_memories(&self, limit: usize) -> Result<MemoryListing, EngineError> {
        let memories = self.memory.all_documents(limit).await?;
        Ok(MemoryListing {
            count: memories.len(),
            memories,
        })
    }

    pub async fn clear_memory(&self) -> ClearReport {
        match self.memory.clear().await {
            Ok(()) => ClearReport {
                status: "success".to_string(),
                message: "Memory cleared".to_string(),
            },
            Err(e) => {
                warn!("Failed to clear memory: {}", e);
                ClearReport {
                    status: "error".to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Re-pair log rows and index documents
    pub async fn reconcile_memory(&self) -> Result<usize, EngineError> {
        Ok(self.memory.reconcile().await?)
    }

    pub async fn agent_status(&self) -> Result<AgentStatus, EngineError> {
        let mut providers = Vec::new();
        if let Some(generation) = &self.generation {
            providers.push(ProviderHealth {
                name: generation.name().to_string(),
                capability: "generation".to_string(),
                healthy: generation.check_health().await,
            });
        }
        if let Some(search) = &self.search {
            providers.push(ProviderHealth {
                name: search.name().to_string(),
                capability: "search".to_string(),
                healthy: search.check_health().await,
            });
        }

        Ok(AgentStatus {
            status: "active".to_string(),
            workers: self.workers.names(),
            memory_stats: self.memory.stats().await?,
            execution_history_count: self.history.len(),
            providers,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub async fn shutdown(&self) {
        self.memory.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HashingEmbedder, MemoryLog, SqliteVectorIndex};
    use async_trait::async_trait;
    use sdk::Worker;
    use tempfile::TempDir;

    struct Fixed(&'static str, WorkerKind);

    #[async_trait]
    impl Worker for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> WorkerKind {
            self.1
        }

        async fn execute(&self, task: &str) -> WorkerResponse {
            WorkerResponse::success(self.0, task, format!("{} handled", self.0))
        }
    }

    async fn orchestrator(dir: &TempDir) -> Orchestrator {
        let log = MemoryLog::open(&dir.path().join("memory.db")).await.unwrap();
        let index = SqliteVectorIndex::open(&dir.path().join("index"), Arc::new(HashingEmbedder::new(64)))
            .await
            .unwrap();
        let workers = WorkerSet::new(
            Arc::new(Fixed("SearchWorker", WorkerKind::Search)),
            Arc::new(Fixed("CodeGenWorker", WorkerKind::CodeGen)),
            Arc::new(Fixed("ExecWorker", WorkerKind::Exec)),
        );
        Orchestrator::new(
            workers,
            Arc::new(MemoryStore::new(log, Arc::new(index))),
            ExecutionHistory::new(None),
        )
    }

    #[tokio::test]
    async fn test_execute_task_routes_and_records() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        let outcome = orch.execute_task("print('hi')", None).await.unwrap();

        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.orchestration.worker_kind, WorkerKind::Exec);
        assert_eq!(outcome.orchestration.worker_response.worker_name, "ExecWorker");
        assert_eq!(orch.execution_history(10).count, 1);
        assert_eq!(orch.conversation_history(10, 0).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_explicit_kind_overrides_router() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        let outcome = orch
            .execute_task("What is recursion?", Some(WorkerKind::CodeGen))
            .await
            .unwrap();
        assert_eq!(outcome.orchestration.worker_kind, WorkerKind::CodeGen);
    }

    #[tokio::test]
    async fn test_unknown_kind_yields_error_envelope() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        let reply = orch.execute_task_request("translate this", Some("translator")).await;

        match reply {
            Reply::Error(envelope) => {
                assert_eq!(envelope.status, "error");
                assert_eq!(envelope.task, "translate this");
                assert!(envelope.message.contains("translator"));
            }
            Reply::Ok(_) => panic!("expected error envelope"),
        }
        assert!(orch.conversation_history(10, 0).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_kind_aliases_accepted() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        let reply = orch.execute_task_request("anything", Some("coding")).await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn test_pipeline_is_recorded_once() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        let report = orch.execute_pipeline_task("sort numbers").await.unwrap();

        assert_eq!(report.steps.len(), 3);
        let history = orch.execution_history(10);
        assert_eq!(history.count, 1);
        assert!(history.history[0].pipeline);
        assert_eq!(history.history[0].worker_kind, WorkerKind::Exec);
    }

    #[tokio::test]
    async fn test_status_and_clear() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;

        orch.execute_task("search for tokio", None).await.unwrap();
        let status = orch.agent_status().await.unwrap();
        assert_eq!(status.status, "active");
        assert_eq!(status.workers, vec!["SearchWorker", "CodeGenWorker", "ExecWorker"]);
        assert_eq!(status.memory_stats.total_records, 1);
        assert_eq!(status.execution_history_count, 1);
        assert!(status.providers.is_empty());

        let listing = orch.all_memories(10).await.unwrap();
        assert_eq!(listing.count, 1);
        assert_eq!(listing.memories[0].metadata["task"], "search for tokio");

        let cleared = orch.clear_memory().await;
        assert_eq!(cleared.status, "success");
        assert_eq!(orch.all_memories(10).await.unwrap().count, 0);

        let recall = orch.recall_context("tokio").await.unwrap();
        assert_eq!(recall.count, 0);
        // Execution history is in-process and survives a memory clear
        assert_eq!(orch.execution_history(10).count, 1);
    }

    #[test]
    fn test_error_envelope_serialization() {
        let reply: Reply<TaskOutcome> = Reply::Error(ErrorEnvelope::new("Unknown worker type: x", "t"));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "error", "message": "Unknown worker type: x", "task": "t" })
        );
    }
}

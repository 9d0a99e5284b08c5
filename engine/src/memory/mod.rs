//! Dual-write memory store
//!
//! Every stored interaction goes to two independent stores:
//!
//! - [`MemoryLog`]: append-only structured log (ids, timestamps, history)
//! - [`SemanticIndex`]: embedded documents for similarity recall
//!
//! The writes are sequential and share no transaction. If the index write
//! fails after the log write succeeded, the log row is left without a
//! document: `store` reports `indexed: false` and logs at `error!`, and
//! [`MemoryStore::reconcile`] repairs such rows later. Concurrent `store` calls
//! are plain inserts and cannot corrupt either store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use sdk::{EngineError, Metadata};

use crate::config::Config;

pub mod embedding;
pub mod index;
pub mod log;

pub use embedding::{Embedder, HashingEmbedder};
pub use index::{SemanticIndex, SqliteVectorIndex};
pub use log::MemoryLog;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory log error: {0}")]
    Log(#[source] sqlx::Error),

    #[error("Semantic index error: {0}")]
    Index(#[source] sqlx::Error),

    #[error("Failed to prepare storage at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt memory record: {0}")]
    Corrupt(String),
}

impl From<MemoryError> for EngineError {
    fn from(e: MemoryError) -> Self {
        EngineError::Database(e.to_string())
    }
}

/// One row of the structured log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub task: String,
    pub worker_name: String,
    pub result: String,
    pub timestamp: String,
    pub metadata: Metadata,
}

/// Document as handed to the index
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub record_id: i64,
    pub content: String,
    pub task: String,
    pub worker_name: String,
    pub timestamp: String,
}

/// Document as stored in the index, metadata flattened to JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedDocument {
    pub content: String,
    pub metadata: Value,
}

/// A recall match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    pub content: String,
    pub metadata: Value,
    pub relevance_score: f64,
    /// Coarse bucket of the score: "high", "medium" or "low"
    pub relevance: String,
}

impl RecallHit {
    pub fn new(doc: IndexedDocument, score: f64) -> Self {
        let relevance = if score >= 0.75 {
            "high"
        } else if score >= 0.4 {
            "medium"
        } else {
            "low"
        };
        Self {
            content: doc.content,
            metadata: doc.metadata,
            relevance_score: score,
            relevance: relevance.to_string(),
        }
    }
}

/// Result of a `store` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub record_id: i64,
    /// False when the log row was written but the index document was not
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_records: i64,
    pub indexed_documents: i64,
    pub worker_names: Vec<String>,
    pub index_backend: String,
    pub status: String,
}

/// Text embedded for a log record
pub fn compose_document(task: &str, worker_name: &str, result: &str) -> String {
    format!("Task: {}\nWorker: {}\nResult: {}", task, worker_name, result)
}

/// Open a WAL-mode SQLite pool at `path`, creating the file and parent directory
pub(crate) async fn connect(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .disable_statement_logging();

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

pub struct MemoryStore {
    log: MemoryLog,
    index: Arc<dyn SemanticIndex>,
}

impl MemoryStore {
    pub fn new(log: MemoryLog, index: Arc<dyn SemanticIndex>) -> Self {
        Self { log, index }
    }

    /// Open both stores at the locations named in config
    pub async fn open(config: &Config) -> Result<Self, MemoryError> {
        let log = MemoryLog::open(&config.memory_db_path()).await?;
        let embedder = Arc::new(HashingEmbedder::new(config.memory.embedding_dimensions));
        let index = SqliteVectorIndex::open(&config.index_dir(), embedder).await?;
        Ok(Self::new(log, Arc::new(index)))
    }

    /// Write a record to the log, then its document to the index
    pub async fn store(
        &self,
        task: &str,
        worker_name: &str,
        result: &str,
        metadata: &Metadata,
    ) -> Result<StoreOutcome, MemoryError> {
        let (record_id, timestamp) = self.log.append(task, worker_name, result, metadata).await?;

        let doc = NewDocument {
            record_id,
            content: compose_document(task, worker_name, result),
            task: task.to_string(),
            worker_name: worker_name.to_string(),
            timestamp,
        };

        let indexed = match self.index.add(doc).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Memory record {} logged but not indexed: {}. Run reconcile to repair.",
                    record_id, e
                );
                false
            }
        };

        Ok(StoreOutcome { record_id, indexed })
    }

    /// Up to `k` index matches by descending relevance
    pub async fn recall(&self, query: &str, k: usize) -> Result<Vec<RecallHit>, MemoryError> {
        self.index.search(query, k).await
    }

    /// Log records newest-first
    pub async fn history(&self, limit: i64, offset: i64) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.log.recent(limit.max(0), offset.max(0)).await
    }

    /// Empty the log, then the index
    pub async fn clear(&self) -> Result<(), MemoryError> {
        let removed = self.log.clear().await?;
        self.index.clear().await?;
        info!("Memory cleared ({} records)", removed);
        Ok(())
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        Ok(MemoryStats {
            total_records: self.log.count().await?,
            indexed_documents: self.index.count().await?,
            worker_names: self.log.worker_names().await?,
            index_backend: self.index.backend_name().to_string(),
            status: "active".to_string(),
        })
    }

    /// Raw index listing in insertion order
    pub async fn all_documents(&self, limit: usize) -> Result<Vec<IndexedDocument>, MemoryError> {
        self.index.documents(limit).await
    }

    /// Repair pairing between the two stores.
    ///
    /// Log rows with no index document are re-indexed and index documents whose
    /// log row is gone are dropped. Returns the number of repairs.
    ///
    /// Safe to run next to `store`: the index snapshot is taken before the log
    /// ids, and `add` ignores a record that gained its document in between.
    pub async fn reconcile(&self) -> Result<usize, MemoryError> {
        let indexed = self.index.indexed_record_ids().await?;
        let logged = self.log.ids().await?;

        let mut repaired = 0;
        for id in logged.iter().filter(|id| !indexed.contains(id)) {
            let Some(record) = self.log.get(*id).await? else {
                continue;
            };
            let added = self
                .index
                .add(NewDocument {
                    record_id: record.id,
                    content: compose_document(&record.task, &record.worker_name, &record.result),
                    task: record.task,
                    worker_name: record.worker_name,
                    timestamp: record.timestamp,
                })
                .await?;
            if added {
                repaired += 1;
            }
        }

        let logged: std::collections::HashSet<i64> = logged.into_iter().collect();
        let dangling: Vec<i64> = indexed.difference(&logged).copied().collect();
        if !dangling.is_empty() {
            warn!("Dropping {} index documents with no log record", dangling.len());
            self.index.remove_records(&dangling).await?;
            repaired += dangling.len();
        }

        if repaired > 0 {
            info!("Reconciled {} memory records", repaired);
        }
        Ok(repaired)
    }

    pub async fn close(&self) {
        self.log.close().await;
    }
}

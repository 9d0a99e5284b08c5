//! Semantic recall index
//!
//! Documents are the composed `Task/Worker/Result` text of a log record plus
//! its embedding. Recall ranks every stored document by cosine similarity to
//! the query embedding and falls back to keyword containment when nothing
//! scores above zero.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::embedding::{self, Embedder};
use super::{connect, IndexedDocument, MemoryError, NewDocument, RecallHit};

/// Relevance assigned to keyword-containment matches
pub const KEYWORD_MATCH_SCORE: f64 = 0.9;

/// Storage and lookup for embedded memory documents
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Human-readable backend name reported in stats
    fn backend_name(&self) -> &str;

    /// Store the document for a log record. Idempotent per `record_id`:
    /// returns false when that record already had a document.
    async fn add(&self, doc: NewDocument) -> Result<bool, MemoryError>;

    /// At most `k` hits by descending relevance
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RecallHit>, MemoryError>;

    /// Raw listing in insertion order
    async fn documents(&self, limit: usize) -> Result<Vec<IndexedDocument>, MemoryError>;

    /// Log ids that have a document
    async fn indexed_record_ids(&self) -> Result<HashSet<i64>, MemoryError>;

    /// Drop documents for the given log ids
    async fn remove_records(&self, record_ids: &[i64]) -> Result<u64, MemoryError>;

    async fn count(&self) -> Result<i64, MemoryError>;

    async fn clear(&self) -> Result<(), MemoryError>;
}

/// SQLite-backed vector index with brute-force cosine ranking
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorIndex {
    /// Open (creating if needed) `index.db` inside `dir`
    pub async fn open(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| MemoryError::Storage {
                path: dir.to_path_buf(),
                source,
            })?;

        let path = dir.join("index.db");
        info!("Opening semantic index at {}", path.display());
        let pool = connect(&path).await.map_err(MemoryError::Index)?;

        sqlx::raw_sql(include_str!("../../migrations/002_semantic_index.sql"))
            .execute(&pool)
            .await
            .map_err(MemoryError::Index)?;

        Ok(Self { pool, embedder })
    }

    async fn keyword_matches(&self, query: &str, k: usize) -> Result<Vec<RecallHit>, MemoryError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT record_id, content, task, worker_name, timestamp FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Index)?;

        Ok(rows
            .into_iter()
            .filter(|row| row.get::<String, _>("content").to_lowercase().contains(&needle))
            .take(k)
            .map(|row| RecallHit::new(document_from_row(&row), KEYWORD_MATCH_SCORE))
            .collect())
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> IndexedDocument {
    IndexedDocument {
        content: row.get("content"),
        metadata: json!({
            "task": row.get::<String, _>("task"),
            "worker_name": row.get::<String, _>("worker_name"),
            "timestamp": row.get::<String, _>("timestamp"),
            "record_id": row.get::<i64, _>("record_id"),
        }),
    }
}

#[async_trait]
impl SemanticIndex for SqliteVectorIndex {
    fn backend_name(&self) -> &str {
        "sqlite-vector"
    }

    async fn add(&self, doc: NewDocument) -> Result<bool, MemoryError> {
        let vector = self.embedder.embed(&doc.content);

        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (record_id, content, task, worker_name, timestamp, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(record_id) DO NOTHING
            "#,
        )
        .bind(doc.record_id)
        .bind(&doc.content)
        .bind(&doc.task)
        .bind(&doc.worker_name)
        .bind(&doc.timestamp)
        .bind(embedding::to_bytes(&vector))
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Index)?
        .rows_affected();

        if inserted == 0 {
            debug!("Record {} already indexed", doc.record_id);
        }
        Ok(inserted > 0)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RecallHit>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query);
        let rows = sqlx::query(
            "SELECT record_id, content, task, worker_name, timestamp, embedding FROM documents",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Index)?;

        let mut scored: Vec<(f32, IndexedDocument)> = rows
            .iter()
            .filter_map(|row| {
                let stored = embedding::from_bytes(&row.get::<Vec<u8>, _>("embedding"));
                let score = embedding::cosine_similarity(&query_vector, &stored);
                (score > 0.0).then(|| (score, document_from_row(row)))
            })
            .collect();

        if scored.is_empty() {
            debug!("No embedding match for '{}', using keyword containment", query);
            return self.keyword_matches(query, k).await;
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, doc)| RecallHit::new(doc, f64::from(score)))
            .collect())
    }

    async fn documents(&self, limit: usize) -> Result<Vec<IndexedDocument>, MemoryError> {
        let rows = sqlx::query(
            "SELECT record_id, content, task, worker_name, timestamp FROM documents ORDER BY id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Index)?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn indexed_record_ids(&self) -> Result<HashSet<i64>, MemoryError> {
        let rows = sqlx::query("SELECT DISTINCT record_id FROM documents")
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Index)?;
        Ok(rows.iter().map(|r| r.get("record_id")).collect())
    }

    async fn remove_records(&self, record_ids: &[i64]) -> Result<u64, MemoryError> {
        let mut removed = 0;
        for id in record_ids {
            removed += sqlx::query("DELETE FROM documents WHERE record_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(MemoryError::Index)?
                .rows_affected();
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<i64, MemoryError> {
        sqlx::query("SELECT COUNT(*) AS total FROM documents")
            .fetch_one(&self.pool)
            .await
            .map(|r| r.get("total"))
            .map_err(MemoryError::Index)
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Index)?;
        Ok(())
    }
}

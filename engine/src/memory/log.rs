//! Structured memory log
//!
//! Append-only SQLite table of every stored worker response. The log assigns
//! ids and timestamps; history reads are newest-first.

use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use sdk::Metadata;

use super::{connect, MemoryError, MemoryRecord};

pub struct MemoryLog {
    pool: SqlitePool,
}

impl MemoryLog {
    /// Open (creating if needed) the log database at `path` and apply its schema
    pub async fn open(path: &Path) -> Result<Self, MemoryError> {
        info!("Opening memory log at {}", path.display());
        let pool = connect(path).await.map_err(MemoryError::Log)?;

        sqlx::raw_sql(include_str!("../../migrations/001_memory_log.sql"))
            .execute(&pool)
            .await
            .map_err(MemoryError::Log)?;

        debug!("Memory log schema ready");
        Ok(Self { pool })
    }

    /// Append a record and return its log-assigned id and timestamp
    pub async fn append(
        &self,
        task: &str,
        worker_name: &str,
        result: &str,
        metadata: &Metadata,
    ) -> Result<(i64, String), MemoryError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| MemoryError::Corrupt(format!("unserializable metadata: {}", e)))?;

        let row = sqlx::query(
            r#"
            INSERT INTO memory (task, worker_name, result, metadata)
            VALUES (?, ?, ?, ?)
            RETURNING id, timestamp
            "#,
        )
        .bind(task)
        .bind(worker_name)
        .bind(result)
        .bind(metadata_json)
        .fetch_one(&self.pool)
        .await
        .map_err(MemoryError::Log)?;

        Ok((row.get("id"), row.get("timestamp")))
    }

    /// Records newest-first
    pub async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<MemoryRecord>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, task, worker_name, result, timestamp, metadata
            FROM memory
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Log)?;

        rows.into_iter().map(record_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<MemoryRecord>, MemoryError> {
        let row = sqlx::query(
            "SELECT id, task, worker_name, result, timestamp, metadata FROM memory WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(MemoryError::Log)?;

        row.map(record_from_row).transpose()
    }

    /// All record ids in ascending order
    pub async fn ids(&self) -> Result<Vec<i64>, MemoryError> {
        let rows = sqlx::query("SELECT id FROM memory ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Log)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    pub async fn count(&self) -> Result<i64, MemoryError> {
        sqlx::query("SELECT COUNT(*) AS total FROM memory")
            .fetch_one(&self.pool)
            .await
            .map(|r| r.get("total"))
            .map_err(MemoryError::Log)
    }

    /// Distinct worker names in first-seen order
    pub async fn worker_names(&self) -> Result<Vec<String>, MemoryError> {
        let rows = sqlx::query(
            "SELECT worker_name FROM memory GROUP BY worker_name ORDER BY MIN(id)",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Log)?;
        Ok(rows.iter().map(|r| r.get("worker_name")).collect())
    }

    /// Delete every record. Ids keep increasing afterwards.
    pub async fn clear(&self) -> Result<u64, MemoryError> {
        let done = sqlx::query("DELETE FROM memory")
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Log)?;
        Ok(done.rows_affected())
    }

    /// Checkpoint the WAL and close all connections
    pub async fn close(&self) {
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            debug!("WAL checkpoint failed: {}", e);
        }
        self.pool.close().await;
    }
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, MemoryError> {
    let metadata_text: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata_text).map_err(|e| {
        MemoryError::Corrupt(format!("record {}: {}", row.get::<i64, _>("id"), e))
    })?;

    Ok(MemoryRecord {
        id: row.get("id"),
        task: row.get("task"),
        worker_name: row.get("worker_name"),
        result: row.get("result"),
        timestamp: row.get("timestamp"),
        metadata,
    })
}

//! In-process execution history
//!
//! One [`ExecutionRecord`] per top-level orchestrator call, kept for the life
//! of the process. Unbounded unless a cap is configured, in which case the
//! oldest entries are dropped first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use sdk::{WorkerKind, WorkerResponse, WorkerStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub task: String,
    pub worker_kind: WorkerKind,
    pub status: WorkerStatus,
    pub response: WorkerResponse,
    /// Set for pipeline runs, where `response` is the last stage that ran
    pub pipeline: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(task: impl Into<String>, worker_kind: WorkerKind, response: WorkerResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            worker_kind,
            status: response.status,
            response,
            pipeline: false,
            recorded_at: Utc::now(),
        }
    }

    pub fn from_pipeline(mut self) -> Self {
        self.pipeline = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct ExecutionHistory {
    entries: Mutex<VecDeque<ExecutionRecord>>,
    max_entries: Option<usize>,
}

impl ExecutionHistory {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    pub fn append(&self, record: ExecutionRecord) {
        let mut entries = self.lock();
        entries.push_back(record);
        if let Some(cap) = self.max_entries {
            while entries.len() > cap {
                entries.pop_front();
            }
        }
    }

    /// The last `limit` entries in chronological order
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ExecutionRecord>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

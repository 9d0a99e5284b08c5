//! Worker response and classification types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

/// Ordered auxiliary detail attached to a response (stdout/stderr split,
/// validity flags, result lists). Keys keep insertion order.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which worker variant handles a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Web search and information retrieval
    Search,

    /// Code generation through a text generation provider
    #[serde(alias = "coding")]
    CodeGen,

    /// Sandboxed code execution
    #[serde(alias = "execution")]
    Exec,
}

impl WorkerKind {
    /// All worker kinds in registration order
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Search, WorkerKind::CodeGen, WorkerKind::Exec];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Search => "search",
            WorkerKind::CodeGen => "codegen",
            WorkerKind::Exec => "exec",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "search" => Ok(WorkerKind::Search),
            "codegen" | "coding" => Ok(WorkerKind::CodeGen),
            "exec" | "execution" => Ok(WorkerKind::Exec),
            other => Err(EngineError::UnknownWorker(other.to_string())),
        }
    }
}

/// Outcome of a worker invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Success,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Success => "success",
            WorkerStatus::Error => "error",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure class recorded under the `error_kind` metadata key of an
/// Error-status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A provider credential is missing
    Configuration,

    /// Network or provider failure
    Provider,

    /// Sandbox denylist matched; no process was spawned
    SafetyRejected,

    /// Sandbox wall-clock limit expired; the process was killed
    TimedOut,

    /// Sandbox could not start the interpreter
    SpawnFailed,

    /// The executed code wrote to stderr
    Runtime,

    /// Anything else caught at a worker boundary
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Provider => "provider",
            FailureKind::SafetyRejected => "safety_rejected",
            FailureKind::TimedOut => "timed_out",
            FailureKind::SpawnFailed => "spawn_failed",
            FailureKind::Runtime => "runtime",
            FailureKind::Internal => "internal",
        }
    }
}

/// Response returned by every worker
///
/// `result` holds the primary output on success and the diagnostic on error;
/// everything else goes into `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_name: String,
    pub task: String,
    pub status: WorkerStatus,
    pub result: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl WorkerResponse {
    /// Create a successful response
    pub fn success(
        worker_name: impl Into<String>,
        task: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            task: task.into(),
            status: WorkerStatus::Success,
            result: result.into(),
            metadata: Metadata::new(),
        }
    }

    /// Create an error response tagged with its failure class
    pub fn error(
        worker_name: impl Into<String>,
        task: impl Into<String>,
        kind: FailureKind,
        diagnostic: impl Into<String>,
    ) -> Self {
        let diagnostic = diagnostic.into();
        let mut metadata = Metadata::new();
        metadata.insert("error_kind".to_string(), kind.as_str().into());
        metadata.insert("error".to_string(), diagnostic.clone().into());
        Self {
            worker_name: worker_name.into(),
            task: task.into(),
            status: WorkerStatus::Error,
            result: diagnostic,
            metadata,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }

    /// Failure class of an Error-status response, if recorded
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.metadata
            .get("error_kind")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

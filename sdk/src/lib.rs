//! Taskmesh SDK
//!
//! Shared library providing the worker contract, response types and error
//! taxonomy. This crate is used by the engine and by anything that wants to
//! plug a worker into the orchestrator.

/// Error types and handling
pub mod errors;

/// Worker response and classification types
pub mod types;

/// Worker trait
pub mod worker;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{FailureKind, Metadata, WorkerKind, WorkerResponse, WorkerStatus};
pub use worker::Worker;

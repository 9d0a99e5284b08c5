//! Worker trait
//!
//! Every worker variant implements the same capability: take a free-text task
//! and produce a [`WorkerResponse`]. Expected failures are reported through the
//! response status, so `execute` has no error channel.

use async_trait::async_trait;

use crate::types::{WorkerKind, WorkerResponse};

/// Trait that all workers must implement
#[async_trait]
pub trait Worker: Send + Sync {
    /// Returns the worker name recorded in responses and memory
    fn name(&self) -> &str;

    /// Returns the kind this worker is registered under
    fn kind(&self) -> WorkerKind;

    /// Execute a task
    ///
    /// Implementations must catch provider, sandbox and unexpected failures and
    /// convert them into an Error-status response.
    async fn execute(&self, task: &str) -> WorkerResponse;
}

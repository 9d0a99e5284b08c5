//! Error types and handling
//!
//! This module provides the hard-failure error type used throughout the
//! Taskmesh engine. Expected failures (provider outages, missing credentials,
//! sandbox rejections and timeouts) are NOT represented here: they are turned
//! into Error-status [`WorkerResponse`](crate::types::WorkerResponse)s at the
//! worker boundary. `EngineError` is reserved for conditions the orchestrator
//! itself cannot recover from, such as an unreachable storage backend.
//!
//! All errors implement [`ErrorExt`], which provides user-friendly hints and
//! indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for engine error extensions
///
/// Hints are safe to display to end users: they never include credentials,
/// file paths or raw provider payloads.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require manual intervention or a restart.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: Structured log or semantic index failures
/// - **Routing**: Unknown worker kinds
/// - **Network**: HTTP client setup and listener failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::UnknownWorker("translator".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Database("disk I/O error".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Routing errors
    #[error("Unknown worker type: {0}")]
    UnknownWorker(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Memory storage failed. Check the data directory and try again",
            Self::UnknownWorker(_) => "Use one of: search, codegen, exec",
            Self::Network(_) => "Network operation failed. Check your connection",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Database(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

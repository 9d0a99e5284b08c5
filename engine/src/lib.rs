//! Taskmesh Engine Library
//!
//! This library provides the core functionality of the taskmesh orchestrator.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Sandboxed code execution
pub mod sandbox;

/// Text generation provider abstraction layer
pub mod llm;

/// Web search provider abstraction layer
pub mod search;

/// Search, code generation and execution workers
pub mod workers;

/// Heuristic task classification
pub mod router;

/// Dual-write memory store (structured log + semantic index)
pub mod memory;

/// In-process execution history
pub mod history;

/// Search → CodeGen → Exec pipeline
pub mod pipeline;

/// Orchestration core
pub mod orchestrator;

/// HTTP and WebSocket transport
pub mod server;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

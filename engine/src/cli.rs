//! CLI interface for Taskmesh
//!
//! This module provides the command-line interface using clap's derive API.
//! Every command drives the same orchestrator the HTTP server uses.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sdk::WorkerKind;

/// Taskmesh task orchestrator
///
/// Routes free-text tasks to search, code generation and sandboxed execution
/// workers, and remembers every interaction.
#[derive(Parser, Debug)]
#[command(name = "taskmesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Execute a single task
    Run {
        /// The task to execute
        task: String,

        /// Worker to use instead of automatic routing (search, codegen, exec)
        #[arg(short, long, value_name = "KIND")]
        worker: Option<WorkerKind>,
    },

    /// Run the search → codegen → exec pipeline
    Pipeline {
        /// The task to execute
        task: String,
    },

    /// Recall memories related to a query
    Recall {
        /// Text to search memory for
        query: String,
    },

    /// Show the persistent memory log, newest first
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "50")]
        limit: i64,

        /// Number of newest records to skip
        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Show executions recorded by this process
    Executions {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show worker, memory and provider status
    Status,

    /// Delete every memory record
    Clear,

    /// Repair log records and index documents that lost their pair
    Reconcile,
}

//! Command handlers for CLI operations
//!
//! Each handler drives one orchestrator operation and prints the result either
//! as human-readable text or as the same JSON payload the HTTP server returns.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use sdk::{EngineError, ErrorExt, WorkerKind, WorkerResponse, WorkerStatus};

use crate::orchestrator::Orchestrator;
use crate::server;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_mark(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Success => "✓",
        WorkerStatus::Error => "✗",
    }
}

fn print_response(response: &WorkerResponse) {
    println!(
        "{} {} [{}]",
        status_mark(response.status),
        response.worker_name,
        response.status.as_str()
    );
    println!("{}", response.result);
    if let Some(kind) = response.failure_kind() {
        println!("  Failure: {:?}", kind);
    }
}

/// User-facing hint for the first engine error in `err`'s chain
pub fn error_hint(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(|e| e.user_hint())
}

/// Start the HTTP server and block until Ctrl-C
pub async fn handle_serve(orchestrator: Arc<Orchestrator>, host: &str, port: u16) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    server::serve(Arc::clone(&orchestrator), host, port, shutdown)
        .await
        .context("Server failed")?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Execute one task, routed or on an explicit worker
pub async fn handle_run(
    orchestrator: &Orchestrator,
    task: &str,
    worker: Option<WorkerKind>,
    format: OutputFormat,
) -> Result<()> {
    let outcome = orchestrator
        .execute_task(task, worker)
        .await
        .context("Failed to execute task")?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            println!("Task: {}", outcome.orchestration.task);
            println!("Routed to: {}", outcome.orchestration.worker_kind);
            println!();
            print_response(&outcome.orchestration.worker_response);
        }
    }
    Ok(())
}

/// Run the three-stage pipeline
pub async fn handle_pipeline(orchestrator: &Orchestrator, task: &str, format: OutputFormat) -> Result<()> {
    let report = orchestrator
        .execute_pipeline_task(task)
        .await
        .context("Pipeline failed")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Pipeline: {}", report.task);
            for (i, step) in report.steps.iter().enumerate() {
                println!();
                println!("Step {}:", i + 1);
                print_response(step);
            }
            println!();
            println!("Final result:");
            println!("{}", report.final_result);
        }
    }
    Ok(())
}

pub async fn handle_recall(orchestrator: &Orchestrator, query: &str, format: OutputFormat) -> Result<()> {
    let report = orchestrator
        .recall_context(query)
        .await
        .context("Failed to recall memories")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            if report.relevant_memories.is_empty() {
                println!("No memories related to: {}", query);
                return Ok(());
            }

            println!("Memories related to '{}' ({}):", query, report.count);
            for hit in &report.relevant_memories {
                println!();
                println!("[{} {:.2}]", hit.relevance, hit.relevance_score);
                println!("{}", hit.content);
            }
        }
    }
    Ok(())
}

/// Show the persistent memory log
pub async fn handle_history(
    orchestrator: &Orchestrator,
    limit: i64,
    offset: i64,
    format: OutputFormat,
) -> Result<()> {
    let page = orchestrator
        .conversation_history(limit, offset)
        .await
        .context("Failed to fetch memory history")?;

    match format {
        OutputFormat::Json => print_json(&page)?,
        OutputFormat::Text => {
            if page.history.is_empty() {
                println!("No records in memory");
                return Ok(());
            }

            println!("Memory log (newest first):");
            for record in &page.history {
                println!();
                println!("#{} {} {}", record.id, record.timestamp, record.worker_name);
                println!("  Task: {}", record.task);
                println!("  Result: {}", record.result);
            }
        }
    }
    Ok(())
}

/// Show executions recorded by this process
pub fn handle_executions(orchestrator: &Orchestrator, limit: usize, format: OutputFormat) -> Result<()> {
    let page = orchestrator.execution_history(limit);

    match format {
        OutputFormat::Json => print_json(&page)?,
        OutputFormat::Text => {
            if page.history.is_empty() {
                println!("No executions recorded in this process");
                return Ok(());
            }

            for record in &page.history {
                println!(
                    "{} {} {} {}{}",
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    status_mark(record.status),
                    record.worker_kind,
                    record.task,
                    if record.pipeline { " (pipeline)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

pub async fn handle_status(orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let status = orchestrator
        .agent_status()
        .await
        .context("Failed to read agent status")?;

    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&status)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("commit".to_string(), json!(env!("GIT_COMMIT_HASH")));
                obj.insert("built_at".to_string(), json!(env!("BUILD_TIMESTAMP")));
            }
            print_json(&value)?;
        }
        OutputFormat::Text => {
            println!(
                "Taskmesh v{} ({} - {})",
                status.version,
                env!("GIT_COMMIT_HASH"),
                env!("BUILD_TIMESTAMP")
            );
            println!("Status:  {}", status.status);
            println!("Workers: {}", status.workers.join(", "));
            println!();
            println!("Memory:");
            println!("  Records:         {}", status.memory_stats.total_records);
            println!("  Indexed:         {}", status.memory_stats.indexed_documents);
            println!("  Index backend:   {}", status.memory_stats.index_backend);
            println!("  Executions:      {}", status.execution_history_count);
            println!();
            println!("Providers:");
            for provider in &status.providers {
                println!(
                    "  {:<12} {:<10} {}",
                    provider.name,
                    provider.capability,
                    if provider.healthy { "available" } else { "unavailable" }
                );
            }
        }
    }
    Ok(())
}

pub async fn handle_clear(orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let report = orchestrator.clear_memory().await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!("{}", report.message),
    }

    if report.status == "error" {
        anyhow::bail!("Failed to clear memory: {}", report.message);
    }
    Ok(())
}

pub async fn handle_reconcile(orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let repaired = orchestrator
        .reconcile_memory()
        .await
        .context("Failed to reconcile memory")?;

    match format {
        OutputFormat::Json => print_json(&json!({ "status": "success", "repaired": repaired }))?,
        OutputFormat::Text => {
            if repaired == 0 {
                println!("Memory stores are consistent");
            } else {
                println!("Repaired {} memory records", repaired);
            }
        }
    }
    Ok(())
}

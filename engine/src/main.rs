// Taskmesh task orchestrator
// Main entry point for the taskmesh binary

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use taskmesh_engine::cli::{Cli, Command};
use taskmesh_engine::config::Config;
use taskmesh_engine::handlers::{
    error_hint, handle_clear, handle_executions, handle_history, handle_pipeline, handle_recall,
    handle_reconcile, handle_run, handle_serve, handle_status, OutputFormat,
};
use taskmesh_engine::orchestrator::Orchestrator;
use taskmesh_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(hint) = error_hint(&e) {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "Taskmesh v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let orchestrator = Arc::new(
        Orchestrator::from_config(&config)
            .await
            .context("Failed to start orchestrator")?,
    );

    let result = match cli.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            return handle_serve(orchestrator, &host, port).await;
        }

        Command::Run { task, worker } => {
            tracing::info!("Executing task: {}", task);
            handle_run(&orchestrator, &task, worker, format).await
        }

        Command::Pipeline { task } => {
            tracing::info!("Running pipeline: {}", task);
            handle_pipeline(&orchestrator, &task, format).await
        }

        Command::Recall { query } => handle_recall(&orchestrator, &query, format).await,

        Command::History { limit, offset } => {
            handle_history(&orchestrator, limit, offset, format).await
        }

        Command::Executions { limit } => handle_executions(&orchestrator, limit, format),

        Command::Status => handle_status(&orchestrator, format).await,

        Command::Clear => handle_clear(&orchestrator, format).await,

        Command::Reconcile => handle_reconcile(&orchestrator, format).await,
    };

    orchestrator.shutdown().await;
    result
}

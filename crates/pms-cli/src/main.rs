#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod plan_file;
mod shutdown;
mod steps;
mod worker;

use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::Context;
use pms_engine::engine::OrchestrationEngine;
use pms_engine::execution::{NodeExecution, PlanExecution};
use pms_engine::step::ChannelTaskQueue;
use pms_engine::types::{ExecutionMetadata, Status};
use serde::Serialize;

use crate::config::{Cli, Command};
use crate::plan_file::load_plan;
use crate::shutdown::shutdown_signal;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "pms_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "pms_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "pms_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(target: TRACING_TARGET_SHUTDOWN, "terminated successfully");
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    cli.init_tracing()?;
    cli.validate().context("invalid configuration")?;
    cli.log();

    match &cli.command {
        Command::Validate { plan } => validate(plan).await,
        Command::Run { plan, timeout_secs } => {
            execute(&cli, plan, timeout_secs.map(Duration::from_secs)).await
        }
    }
}

async fn validate(path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path).await?;
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        plan_id = %plan.id(),
        nodes = plan.len(),
        starting_node_id = %plan.starting_node_id(),
        "plan is valid"
    );
    println!("{} is valid ({} nodes)", path.display(), plan.len());
    Ok(())
}

/// What `run` prints once the plan execution ends.
#[derive(Debug, Serialize)]
struct RunSummary {
    plan_execution: PlanExecution,
    nodes: Vec<NodeSummary>,
}

#[derive(Debug, Serialize)]
struct NodeSummary {
    identifier: String,
    status: Status,
    attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

impl From<&NodeExecution> for NodeSummary {
    fn from(execution: &NodeExecution) -> Self {
        Self {
            identifier: execution.node.identifier.clone(),
            status: execution.status,
            attempts: execution.retry_ids.len() + 1,
            failure: execution.failure_info.as_ref().map(|f| f.message.clone()),
        }
    }
}

async fn execute(cli: &Cli, path: &Path, timeout: Option<Duration>) -> anyhow::Result<()> {
    let plan = load_plan(path).await?;

    let (queue, tasks) = ChannelTaskQueue::new();
    let engine = OrchestrationEngine::builder()
        .config(cli.engine.clone())
        .steps(steps::registry())
        .task_queue(queue)
        .build()
        .context("failed to build the engine")?;
    let worker = worker::spawn(engine.clone(), tasks);

    let metadata = ExecutionMetadata {
        trigger_type: Some("CLI".into()),
        triggered_by: std::env::var("USER").ok(),
        ..ExecutionMetadata::default()
    };
    let started = engine
        .start_execution(plan, metadata)
        .await
        .context("failed to start the plan execution")?;
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        plan_execution_id = %started.id,
        "plan execution started"
    );

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let finished = tokio::select! {
        finished = engine.wait_for_completion(started.id) => finished?,
        () = shutdown_signal() => abort_and_wait(&engine, started.id).await?,
        () = deadline => {
            tracing::warn!(
                target: TRACING_TARGET_SHUTDOWN,
                plan_execution_id = %started.id,
                "run timeout reached"
            );
            abort_and_wait(&engine, started.id).await?
        }
    };
    worker.abort();

    let nodes = engine
        .node_executions()
        .list_current(finished.id)
        .await?
        .iter()
        .map(NodeSummary::from)
        .collect();
    let status = finished.status;
    let summary = RunSummary {
        plan_execution: finished,
        nodes,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !status.is_positive() {
        anyhow::bail!("plan execution ended {status}");
    }
    Ok(())
}

async fn abort_and_wait(
    engine: &OrchestrationEngine,
    id: pms_engine::types::PlanExecutionId,
) -> anyhow::Result<PlanExecution> {
    match engine.abort_plan_execution(id).await {
        Ok(aborted) => tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            plan_execution_id = %id,
            aborted,
            "plan execution aborted"
        ),
        // The run finished between the signal and the abort.
        Err(error) => tracing::debug!(
            target: TRACING_TARGET_SHUTDOWN,
            plan_execution_id = %id,
            error = %error,
            "abort skipped"
        ),
    }
    Ok(engine.wait_for_completion(id).await?)
}

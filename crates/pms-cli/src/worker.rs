//! In-process delegate task worker.
//!
//! Drains the engine's [`ChannelTaskQueue`](pms_engine::step::ChannelTaskQueue)
//! and answers each task through the notify engine, the way a remote
//! delegate would.
//!
//! | task type | payload        | result                          |
//! |-----------|----------------|---------------------------------|
//! | `ECHO`    | any            | succeeds with `echo = payload`  |
//! | `SLEEP`   | `{ "ms": u64 }`| succeeds after sleeping         |
//! | `FAIL`    | `{ "message" }`| delivers a failure              |

use std::time::Duration;

use pms_engine::engine::OrchestrationEngine;
use pms_engine::notify::ResponseData;
use pms_engine::step::DelegateTask;
use pms_engine::types::{FailureInfo, FailureType, StepResponse};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tracing target for worker operations.
const TRACING_TARGET_WORKER: &str = "pms_cli::worker";

#[derive(Debug, Default, Deserialize)]
struct SleepPayload {
    #[serde(default)]
    ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FailPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Spawns the worker loop. It ends once the queue's sender is dropped.
pub fn spawn(engine: OrchestrationEngine, mut tasks: mpsc::UnboundedReceiver<DelegateTask>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = tasks.recv().await {
            let engine = engine.clone();
            tokio::spawn(async move { handle(&engine, task).await });
        }
        tracing::debug!(target: TRACING_TARGET_WORKER, "task queue closed");
    })
}

async fn handle(engine: &OrchestrationEngine, task: DelegateTask) {
    tracing::info!(
        target: TRACING_TARGET_WORKER,
        task_id = %task.task_id,
        task_type = %task.request.task_type,
        node_execution_id = %task.node_execution_id,
        "running delegate task"
    );

    let outcome = match run(&task).await {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(value) => engine.notify().deliver(&task.task_id, ResponseData::Payload(value)),
            Err(error) => engine
                .notify()
                .deliver_error(&task.task_id, FailureInfo::new(error.to_string())),
        },
        Err(failure) => engine.notify().deliver_error(&task.task_id, failure),
    };

    tracing::debug!(
        target: TRACING_TARGET_WORKER,
        task_id = %task.task_id,
        outcome = ?outcome,
        "delegate task answered"
    );
}

async fn run(task: &DelegateTask) -> Result<StepResponse, FailureInfo> {
    let payload = &task.request.payload;
    match task.request.task_type.as_str() {
        "ECHO" => Ok(StepResponse::succeeded().with_outcome("echo", payload.clone())),
        "SLEEP" => {
            let sleep: SleepPayload = decode(payload)?;
            tokio::time::sleep(Duration::from_millis(sleep.ms)).await;
            Ok(StepResponse::succeeded().with_outcome("slept_ms", Value::from(sleep.ms)))
        }
        "FAIL" => {
            let fail: FailPayload = decode(payload)?;
            Err(FailureInfo::new(fail.message.unwrap_or_else(|| "task failed".into()))
                .with_type(FailureType::Application))
        }
        other => Err(FailureInfo::new(format!("unknown task type {other}"))
            .with_type(FailureType::Unknown)),
    }
}

fn decode<T>(payload: &Value) -> Result<T, FailureInfo>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone())
        .map_err(|error| FailureInfo::new(format!("invalid task payload: {error}")))
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use pms_engine::step::TaskRequest;
    use pms_engine::types::{Ambiance, CorrelationId, NodeExecutionId, PlanExecutionId, PlanId, Status};
    use serde_json::json;

    use super::*;

    fn task(task_type: &str, payload: Value) -> DelegateTask {
        DelegateTask {
            task_id: CorrelationId::new("task-1"),
            node_execution_id: NodeExecutionId::new(),
            ambiance: Ambiance::new(PlanId::new(), PlanExecutionId::new()),
            request: TaskRequest::new(task_type, payload),
            queued_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn echo_returns_the_payload() {
        let response = run(&task("ECHO", json!({"a": 1}))).await.unwrap();
        assert_eq!(response.status, Status::Succeeded);
        assert_eq!(response.outcomes["echo"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn sleep_waits_then_succeeds() {
        let response = run(&task("SLEEP", json!({"ms": 1}))).await.unwrap();
        assert_eq!(response.outcomes["slept_ms"], 1);
    }

    #[tokio::test]
    async fn fail_and_unknown_types_fail() {
        let failure = run(&task("FAIL", json!({"message": "boom"}))).await.unwrap_err();
        assert_eq!(failure.message, "boom");

        let unknown = run(&task("COMPILE", Value::Null)).await.unwrap_err();
        assert!(unknown.message.contains("COMPILE"));
    }
}

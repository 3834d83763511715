//! One handler per SDK response event type.

use async_trait::async_trait;
use jiff::Timestamp;

use super::event::{
    AddExecutableResponseRequest, AddStepDetailsInstanceRequest, HandleAdviserResponseRequest,
    HandleEventErrorRequest, HandleFacilitateResponseRequest, HandleProgressRequest,
    HandleStepResponseRequest, QueueTaskRequest, ResumeNodeExecutionRequest, SdkResponseEvent,
    SpawnChildRequest, SpawnChildrenRequest, SuspendChainRequest,
};
use crate::TRACING_TARGET_SDK;
use crate::engine::{EngineTask, OrchestrationEngine};
use crate::error::Result;
use crate::execution::{ProgressUpdate, StepDetails, UpdateNodeExecution};
use crate::notify::{Continuation, Notification};
use crate::types::ExecutionMode;

/// Applies one kind of SDK response to the engine.
#[async_trait]
pub trait SdkResponseHandler: Send + Sync {
    /// Handles an event routed to this handler.
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()>;
}

/// Records an executable response and optionally moves the node's status.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddExecutableResponseHandler;

#[async_trait]
impl SdkResponseHandler for AddExecutableResponseHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: AddExecutableResponseRequest = event.decode()?;
        engine
            .add_executable_response(
                request.node_execution_id,
                request.executable_response,
                request.status,
            )
            .await
    }
}

/// Completes an attempt; advising runs on the worker pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleStepResponseHandler;

#[async_trait]
impl SdkResponseHandler for HandleStepResponseHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: HandleStepResponseRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::StepResponse(
            request.node_execution_id,
            request.step_response,
        ));
        Ok(())
    }
}

/// Resumes a parked node as if its wait had fired.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResumeNodeExecutionHandler;

#[async_trait]
impl SdkResponseHandler for ResumeNodeExecutionHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: ResumeNodeExecutionRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::Notify(Notification {
            continuation: Continuation::Resume {
                node_execution_id: request.node_execution_id,
            },
            responses: request.responses,
            is_error: request.is_error,
        }));
        Ok(())
    }
}

/// Applies a facilitation decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleFacilitateResponseHandler;

#[async_trait]
impl SdkResponseHandler for HandleFacilitateResponseHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: HandleFacilitateResponseRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::Facilitated(
            request.node_execution_id,
            request.facilitator_response,
        ));
        Ok(())
    }
}

/// Fails the wait registered on a correlation id.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleEventErrorHandler;

#[async_trait]
impl SdkResponseHandler for HandleEventErrorHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: HandleEventErrorRequest = event.decode()?;
        let outcome = engine
            .notify()
            .deliver_error(&request.correlation_id, request.failure_info);
        tracing::debug!(
            target: TRACING_TARGET_SDK,
            correlation_id = %request.correlation_id,
            outcome = ?outcome,
            "event error delivered"
        );
        Ok(())
    }
}

/// Applies an advise decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleAdviserResponseHandler;

#[async_trait]
impl SdkResponseHandler for HandleAdviserResponseHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: HandleAdviserResponseRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::Advised(
            request.node_execution_id,
            request.adviser_response,
        ));
        Ok(())
    }
}

/// Queues a delegate task and parks the node on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueTaskHandler;

#[async_trait]
impl SdkResponseHandler for QueueTaskHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: QueueTaskRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::QueueTask(
            request.node_execution_id,
            request.task_request,
        ));
        Ok(())
    }
}

/// Parks a node until its callbacks arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuspendChainHandler;

#[async_trait]
impl SdkResponseHandler for SuspendChainHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: SuspendChainRequest = event.decode()?;
        engine
            .suspend_chain(request.node_execution_id, request.callback_ids)
            .await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnChildHandler;

#[async_trait]
impl SdkResponseHandler for SpawnChildHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: SpawnChildRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::SpawnChildren {
            node_execution_id: request.node_execution_id,
            mode: ExecutionMode::Child,
            children: vec![request.child_node_id],
        });
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnChildrenHandler;

#[async_trait]
impl SdkResponseHandler for SpawnChildrenHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: SpawnChildrenRequest = event.decode()?;
        engine.node_executions().get(request.node_execution_id).await?;
        engine.submit(EngineTask::SpawnChildren {
            node_execution_id: request.node_execution_id,
            mode: ExecutionMode::Children,
            children: request.children,
        });
        Ok(())
    }
}

/// Appends a progress update.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleProgressHandler;

#[async_trait]
impl SdkResponseHandler for HandleProgressHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: HandleProgressRequest = event.decode()?;
        let update = UpdateNodeExecution {
            progress: Some(ProgressUpdate {
                ts: Timestamp::now(),
                data: request.progress,
            }),
            ..UpdateNodeExecution::default()
        };
        engine
            .node_executions()
            .update(request.node_execution_id, update)
            .await?;
        Ok(())
    }
}

/// Appends step details.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddStepDetailsInstanceHandler;

#[async_trait]
impl SdkResponseHandler for AddStepDetailsInstanceHandler {
    async fn handle(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let request: AddStepDetailsInstanceRequest = event.decode()?;
        let update = UpdateNodeExecution {
            step_details: Some(StepDetails {
                name: request.name,
                data: request.data,
            }),
            ..UpdateNodeExecution::default()
        };
        engine
            .node_executions()
            .update(request.node_execution_id, update)
            .await?;
        Ok(())
    }
}

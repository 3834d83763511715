//! Orchestration engine.
//!
//! This module drives plan executions to completion:
//! - [`OrchestrationEngine`]: trigger, node lifecycle, advise, finalize
//! - [`EngineBuilder`]: composition of stores, registries and observers
//! - [`EngineConfig`]: configuration options

mod advise;
mod builder;
mod config;
mod executor;
mod interrupt;
mod node;
mod resume;
mod strategy;
mod task;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

pub use self::builder::EngineBuilder;
pub use self::config::{EngineConfig, EngineConfigBuilder, EngineConfigBuilderError};
use self::executor::Executor;
pub(crate) use self::task::EngineTask;
use crate::TRACING_TARGET_ENGINE;
use crate::advise::AdviserRegistry;
use crate::error::{Error, Result};
use crate::event::EventEmitter;
use crate::execution::{NodeExecutionService, PlanExecutionService};
use crate::facilitate::FacilitatorRegistry;
use crate::notify::NotifyEngine;
use crate::observer::{OrchestrationEndObserver, OrchestrationStartObserver, Subject};
use crate::sdk::{SdkResponseEvent, SdkResponseRouter};
use crate::step::{StepRegistry, TaskQueue};
use crate::types::{NodeExecutionId, PlanExecutionId, Status, StepResponse};

/// Outcome of an attempt to write a plan execution's final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// This writer's status was accepted.
    Accepted(Status),
    /// Every conditional write was rejected; `ERRORED` was forced.
    FellBack,
    /// Another writer had already finalized the plan execution.
    Superseded(Status),
    /// Some node is still flowing; nothing was written.
    Pending(Status),
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    executor: Executor,
    plan_executions: PlanExecutionService,
    node_executions: NodeExecutionService,
    notify: Arc<NotifyEngine>,
    steps: StepRegistry,
    facilitators: FacilitatorRegistry,
    advisers: AdviserRegistry,
    task_queue: Option<Arc<dyn TaskQueue>>,
    events: Arc<dyn EventEmitter>,
    router: SdkResponseRouter,
    start_subject: Subject<dyn OrchestrationStartObserver>,
    end_subject: Subject<dyn OrchestrationEndObserver>,
    ends: broadcast::Sender<PlanExecutionId>,
}

/// Drives plan executions through the facilitate, execute and advise
/// lifecycle.
///
/// Cheap to clone; every clone shares the same state. All node work runs on
/// the engine's worker pool, never on the caller's task.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.inner.config)
            .field("notify", &self.inner.notify)
            .finish_non_exhaustive()
    }
}

impl OrchestrationEngine {
    /// Starts building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the plan execution service.
    pub fn plan_executions(&self) -> &PlanExecutionService {
        &self.inner.plan_executions
    }

    /// Returns the node execution service.
    pub fn node_executions(&self) -> &NodeExecutionService {
        &self.inner.node_executions
    }

    /// Returns the notify engine async work reports back through.
    pub fn notify(&self) -> &NotifyEngine {
        &self.inner.notify
    }

    /// Returns the plan execution start subject.
    pub fn start_subject(&self) -> &Subject<dyn OrchestrationStartObserver> {
        &self.inner.start_subject
    }

    /// Returns the plan execution end subject.
    pub fn end_subject(&self) -> &Subject<dyn OrchestrationEndObserver> {
        &self.inner.end_subject
    }

    /// Applies a response sent back by a step or an SDK.
    pub async fn handle_sdk_response(&self, event: SdkResponseEvent) -> Result<()> {
        self.inner.router.dispatch(self, event).await
    }

    /// Returns the number of idle worker permits.
    pub fn available_workers(&self) -> usize {
        self.inner.executor.available_permits()
    }

    /// Submits a task to the worker pool.
    pub(crate) fn submit(&self, task: EngineTask) {
        tracing::trace!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %task.node_execution_id(),
            task = task.name(),
            "task submitted"
        );
        self.inner.executor.spawn(self.clone().run(task));
    }

    /// Submits a task to the worker pool after `delay`.
    pub(crate) fn submit_after(&self, delay: Duration, task: EngineTask) {
        self.inner.executor.spawn_after(delay, self.clone().run(task));
    }

    fn run(self, task: EngineTask) -> BoxFuture<'static, ()> {
        async move {
            let node_execution_id = task.node_execution_id();
            let name = task.name();
            let result = match task {
                EngineTask::Start(id) => self.start_node_execution(id).await,
                EngineTask::Notify(notification) => self.resume(notification).await,
                EngineTask::StepResponse(id, response) => self.handle_step_response(id, response).await,
                EngineTask::Facilitated(id, response) => self.apply_facilitator_response(id, response).await,
                EngineTask::Advised(id, response) => self.apply_external_advise(id, response).await,
                EngineTask::QueueTask(id, request) => self.queue_task(id, request).await,
                EngineTask::SpawnChildren {
                    node_execution_id,
                    mode,
                    children,
                } => self.spawn_children(node_execution_id, mode, children).await,
                EngineTask::Expire(id) => self.expire_node_execution(id).await.map(|_| ()),
            };

            if let Err(error) = result {
                self.fail_node(node_execution_id, name, error).await;
            }
        }
        .boxed()
    }

    /// Routes an error out of a unit of work through the ordinary advise
    /// path: invariant violations end the node `ERRORED`, everything else
    /// `FAILED`.
    async fn fail_node(&self, node_execution_id: NodeExecutionId, task: &'static str, error: Error) {
        if error.is_invariant_violation() {
            tracing::error!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %node_execution_id,
                task,
                error = %error,
                "engine invariant violated"
            );
        } else {
            tracing::warn!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %node_execution_id,
                task,
                error = %error,
                "node execution failed"
            );
        }

        let response = StepResponse::from_error(&error);
        if let Err(error) = self.handle_step_response(node_execution_id, response).await {
            tracing::error!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %node_execution_id,
                error = %error,
                "failure could not be recorded"
            );
        }
    }
}

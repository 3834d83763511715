//! Node lifecycle: create, facilitate, execute, park.

use std::time::Duration;

use futures::FutureExt;
use jiff::Timestamp;
use serde_json::Value;

use super::{EngineTask, OrchestrationEngine};
use crate::TRACING_TARGET_ENGINE;
use crate::error::{Error, Result};
use crate::execution::{NodeExecution, UpdateNodeExecution};
use crate::facilitate::{FacilitateContext, FacilitatorOutcome, FacilitatorResponse};
use crate::notify::{Continuation, ResponseData, WakePhase};
use crate::plan::PlanNode;
use crate::step::{AsyncExecutable, DelegateTask, StepContext, TaskRequest};
use crate::types::{
    Ambiance, CorrelationId, ExecutableResponse, ExecutionMode, FailureInfo, FailureType, Level,
    NodeExecutionId, PlanNodeId, Status, StepResponse,
};

/// Where a new attempt sits relative to existing ones.
#[derive(Debug, Clone, Default)]
pub(crate) struct Lineage {
    pub(crate) parent_id: Option<NodeExecutionId>,
    pub(crate) previous_id: Option<NodeExecutionId>,
    pub(crate) notify_id: Option<CorrelationId>,
    pub(crate) retry_ids: Vec<NodeExecutionId>,
}

impl OrchestrationEngine {
    /// Persists a queued attempt of `node` one level below `base`.
    pub(crate) async fn create_node_execution(
        &self,
        base: &Ambiance,
        node: PlanNode,
        lineage: Lineage,
    ) -> Result<NodeExecution> {
        let id = NodeExecutionId::new();
        let level = Level {
            setup_id: node.id,
            runtime_id: id,
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
            retry_index: u32::try_from(lineage.retry_ids.len()).unwrap_or(u32::MAX),
            start_ts: Timestamp::now(),
        };

        let mut execution = NodeExecution::new(id, base.plan_execution_id, node, base.clone_for_child(level));
        execution.parent_id = lineage.parent_id;
        execution.previous_id = lineage.previous_id;
        execution.notify_id = lineage.notify_id;
        execution.retry_ids = lineage.retry_ids;

        let execution = self.node_executions().create(execution).await?;
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %execution.id,
            identifier = %execution.node.identifier,
            fqn = %execution.ambiance.fqn(),
            "node execution created"
        );
        Ok(execution)
    }

    /// Creates an attempt and submits it to the worker pool.
    pub(crate) async fn trigger_node(
        &self,
        base: &Ambiance,
        node: PlanNode,
        lineage: Lineage,
    ) -> Result<NodeExecution> {
        let execution = self.create_node_execution(base, node, lineage).await?;
        self.submit(EngineTask::Start(execution.id));
        Ok(execution)
    }

    pub(crate) async fn start_node_execution(&self, id: NodeExecutionId) -> Result<()> {
        let execution = self.node_executions().get(id).await?;

        let plan_execution = self
            .plan_executions()
            .get(execution.plan_execution_id)
            .await?;
        if plan_execution.status == Status::Discontinuing || plan_execution.is_final() {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %id,
                plan_status = %plan_execution.status,
                "plan execution is ending, node not started"
            );
            self.abort_node(id, FailureInfo::new("plan execution aborted"))
                .await?;
            return self.conclude(id).await;
        }

        if execution.node.skip_graph_type.is_skip() {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %id,
                skip = ?execution.node.skip_graph_type,
                "node skipped"
            );
            return self.handle_step_response(id, StepResponse::skipped()).await;
        }

        let started = self
            .node_executions()
            .update_status(
                id,
                Status::Running,
                &[Status::Queued, Status::TimedWaiting],
                UpdateNodeExecution::default(),
            )
            .await?;
        let Some(execution) = started else {
            return self.conclude(id).await;
        };

        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            identifier = %execution.node.identifier,
            "node execution started"
        );
        self.facilitate(execution).await
    }

    async fn facilitate(&self, execution: NodeExecution) -> Result<()> {
        for obtainment in &execution.node.facilitator_obtainments {
            let facilitator = self
                .inner
                .facilitators
                .get(&obtainment.facilitator_type)?;
            let ctx = FacilitateContext {
                ambiance: &execution.ambiance,
                node_execution_id: execution.id,
                node: &execution.node,
                parameters: &obtainment.parameters,
            };

            match facilitator.facilitate(ctx).await? {
                FacilitatorOutcome::Decided(response) => {
                    return self.apply_facilitator_response(execution.id, response).await;
                }
                FacilitatorOutcome::Deferred(correlation_id) => {
                    tracing::debug!(
                        target: TRACING_TARGET_ENGINE,
                        node_execution_id = %execution.id,
                        correlation_id = %correlation_id,
                        "facilitation deferred"
                    );
                    return self
                        .park(
                            execution.id,
                            [correlation_id],
                            Continuation::FacilitateResume {
                                node_execution_id: execution.id,
                            },
                        )
                        .await;
                }
                FacilitatorOutcome::Pass => {}
            }
        }

        Err(Error::configuration().with_message(format!(
            "no facilitator decided how to run {}",
            execution.node.identifier
        )))
    }

    pub(crate) async fn apply_facilitator_response(
        &self,
        id: NodeExecutionId,
        response: FacilitatorResponse,
    ) -> Result<()> {
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            mode = %response.execution_mode,
            initial_wait_ms = ?response.initial_wait_ms,
            "facilitated"
        );

        let Some(wait_ms) = response.initial_wait_ms.filter(|ms| *ms > 0) else {
            return self.invoke_execution(id, response.execution_mode).await;
        };

        let update = UpdateNodeExecution {
            mode: Some(response.execution_mode),
            ..UpdateNodeExecution::default()
        };
        let waiting = self
            .node_executions()
            .update_status(id, Status::TimedWaiting, &[Status::Running], update)
            .await?;
        if waiting.is_none() {
            return self.conclude(id).await;
        }
        self.schedule_wake(id, wait_ms, WakePhase::Execute).await
    }

    pub(crate) async fn invoke_execution(&self, id: NodeExecutionId, mode: ExecutionMode) -> Result<()> {
        let update = UpdateNodeExecution {
            mode: Some(mode),
            ..UpdateNodeExecution::default()
        };
        let running = self
            .node_executions()
            .update_status(id, Status::Running, &[Status::Running, Status::TimedWaiting], update)
            .await?;
        let Some(execution) = running else {
            return self.conclude(id).await;
        };

        let step = self.inner.steps.get(&execution.node.step_type)?;
        let ctx = self.step_context(&execution).await?;
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            step_type = %execution.node.step_type,
            mode = %mode,
            "invoking step"
        );

        match mode {
            ExecutionMode::Sync => {
                let response = step.execute_sync(&ctx).await?;
                let update = UpdateNodeExecution {
                    executable_response: Some(ExecutableResponse::Sync),
                    ..UpdateNodeExecution::default()
                };
                self.node_executions().update(id, update).await?;
                self.handle_step_response(id, response).await
            }
            ExecutionMode::Async => {
                let executable = step.execute_async(&ctx).await?;
                self.wait_async(&execution, executable).await
            }
            ExecutionMode::Task => {
                let request = step.obtain_task(&ctx).await?;
                self.queue_task(id, request).await
            }
            ExecutionMode::Child => {
                let child = step.obtain_child(&ctx).await?;
                self.spawn_children(id, mode, vec![child]).await
            }
            ExecutionMode::Children => {
                let children = step.obtain_children(&ctx).await?;
                self.spawn_children(id, mode, children).await
            }
        }
    }

    /// Builds the step's view of an attempt, resolving its ref objects.
    pub(crate) async fn step_context(&self, execution: &NodeExecution) -> Result<StepContext> {
        let inputs = self
            .node_executions()
            .resolve_inputs(execution.plan_execution_id, &execution.node.ref_objects)
            .await?;
        Ok(StepContext {
            ambiance: execution.ambiance.clone(),
            node_execution_id: execution.id,
            node: execution.node.clone(),
            inputs,
        })
    }

    async fn wait_async(&self, execution: &NodeExecution, executable: AsyncExecutable) -> Result<()> {
        let timeout = executable
            .timeout
            .or_else(|| execution.node.timeout_ms.map(Duration::from_millis))
            .or_else(|| self.config().default_timeout());
        let response = ExecutableResponse::Async {
            callback_ids: executable.callback_ids.clone(),
            timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };

        let parked = self
            .park_on_callbacks(execution.id, executable.callback_ids, response, &[Status::Running])
            .await?;
        if !parked {
            return self.conclude(execution.id).await;
        }
        if let Some(timeout) = timeout {
            self.submit_after(timeout, EngineTask::Expire(execution.id));
        }
        Ok(())
    }

    /// Parks a running attempt until every callback id is delivered.
    ///
    /// Used by steps that hand control back to an out-of-process SDK.
    pub async fn suspend_chain(&self, id: NodeExecutionId, callback_ids: Vec<CorrelationId>) -> Result<()> {
        let response = ExecutableResponse::SuspendedChain {
            callback_ids: callback_ids.clone(),
        };
        let parked = self
            .park_on_callbacks(id, callback_ids, response, &[Status::Queued, Status::Running])
            .await?;
        if !parked {
            let current = self.node_executions().get(id).await?;
            return Err(Error::conflict().with_message(format!(
                "node execution {id} cannot be suspended from {}",
                current.status
            )));
        }
        Ok(())
    }

    async fn park_on_callbacks(
        &self,
        id: NodeExecutionId,
        callback_ids: Vec<CorrelationId>,
        response: ExecutableResponse,
        allowed_from: &[Status],
    ) -> Result<bool> {
        let update = UpdateNodeExecution {
            executable_response: Some(response),
            ..UpdateNodeExecution::default()
        };
        let waiting = self
            .node_executions()
            .update_status(id, Status::AsyncWaiting, allowed_from, update)
            .await?;
        if waiting.is_none() {
            return Ok(false);
        }
        self.park(
            id,
            callback_ids,
            Continuation::Resume {
                node_execution_id: id,
            },
        )
        .await?;
        Ok(true)
    }

    /// Queues a delegate task for a running attempt and parks it on the
    /// task id.
    pub(crate) async fn queue_task(&self, id: NodeExecutionId, request: TaskRequest) -> Result<()> {
        let queue = self.inner.task_queue.clone().ok_or_else(|| {
            Error::configuration().with_message("no task queue configured for TASK execution")
        })?;

        let task_id = CorrelationId::generate();
        let update = UpdateNodeExecution {
            mode: Some(ExecutionMode::Task),
            executable_response: Some(ExecutableResponse::Task {
                task_id: task_id.clone(),
            }),
            ..UpdateNodeExecution::default()
        };
        let waiting = self
            .node_executions()
            .update_status(id, Status::TaskWaiting, &[Status::Running], update)
            .await?;
        let Some(execution) = waiting else {
            return self.conclude(id).await;
        };

        self.park(
            id,
            [task_id.clone()],
            Continuation::Resume {
                node_execution_id: id,
            },
        )
        .await?;

        let timeout = request
            .timeout_ms
            .or(execution.node.timeout_ms)
            .map(Duration::from_millis)
            .or_else(|| self.config().default_timeout());
        let task = DelegateTask {
            task_id: task_id.clone(),
            node_execution_id: id,
            ambiance: execution.ambiance,
            request,
            queued_at: Timestamp::now(),
        };

        if let Err(error) = queue.queue_task(task).await {
            tracing::warn!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %id,
                task_id = %task_id,
                error = %error,
                "delegate task could not be queued"
            );
            let failure = FailureInfo::from(&error).with_type(FailureType::Connectivity);
            self.notify().deliver_error(&task_id, failure);
            return Ok(());
        }

        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            task_id = %task_id,
            "delegate task queued"
        );
        if let Some(timeout) = timeout {
            self.submit_after(timeout, EngineTask::Expire(id));
        }
        Ok(())
    }

    /// Fans an attempt out into child chains and parks it until every
    /// chain has finished.
    pub(crate) async fn spawn_children(
        &self,
        id: NodeExecutionId,
        mode: ExecutionMode,
        children: Vec<PlanNodeId>,
    ) -> Result<()> {
        let execution = self.node_executions().get(id).await?;
        let plan = self
            .plan_executions()
            .find_plan(execution.ambiance.plan_id)
            .await?;
        let nodes = children
            .iter()
            .map(|child| plan.fetch_node(*child).cloned())
            .collect::<Result<Vec<_>>>()?;

        let response = match (mode, children.as_slice()) {
            (ExecutionMode::Child, [child]) => ExecutableResponse::Child {
                child_node_id: *child,
            },
            (ExecutionMode::Child, _) => {
                return Err(Error::internal().with_message(format!(
                    "CHILD execution needs exactly one child, got {}",
                    children.len()
                )));
            }
            _ => ExecutableResponse::Children {
                children: children.clone(),
            },
        };
        let update = UpdateNodeExecution {
            mode: Some(mode),
            executable_response: Some(response),
            ..UpdateNodeExecution::default()
        };
        let running = self
            .node_executions()
            .update_status(id, Status::Running, &[Status::Running], update)
            .await?;
        let Some(execution) = running else {
            return self.conclude(id).await;
        };

        let notify_ids: Vec<CorrelationId> = nodes.iter().map(|_| CorrelationId::generate()).collect();
        self.park(
            id,
            notify_ids.clone(),
            Continuation::Resume {
                node_execution_id: id,
            },
        )
        .await?;

        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            children = nodes.len(),
            "spawning children"
        );
        for (node, notify_id) in nodes.into_iter().zip(notify_ids) {
            let lineage = Lineage {
                parent_id: Some(id),
                notify_id: Some(notify_id),
                ..Lineage::default()
            };
            self.trigger_node(&execution.ambiance, node, lineage).await?;
        }
        Ok(())
    }

    /// Records an executable response, optionally moving a flowing attempt
    /// to another flowing status.
    pub async fn add_executable_response(
        &self,
        id: NodeExecutionId,
        response: ExecutableResponse,
        status: Option<Status>,
    ) -> Result<()> {
        let update = UpdateNodeExecution {
            executable_response: Some(response),
            ..UpdateNodeExecution::default()
        };
        let Some(status) = status else {
            self.node_executions().update(id, update).await?;
            return Ok(());
        };

        if status.is_final() {
            return Err(Error::conflict().with_message(format!(
                "final status {status} must be reported as a step response"
            )));
        }
        self.node_executions()
            .update_status(id, status, status.allowed_from(), update)
            .await?
            .ok_or_else(|| {
                Error::conflict().with_message(format!("node execution {id} is no longer flowing"))
            })?;
        Ok(())
    }

    /// Parks a node on a timer.
    pub(crate) async fn schedule_wake(&self, id: NodeExecutionId, wait_ms: u64, phase: WakePhase) -> Result<()> {
        let timer_id = CorrelationId::generate();
        self.park(
            id,
            [timer_id.clone()],
            Continuation::Wake {
                node_execution_id: id,
                phase,
            },
        )
        .await?;

        let notify = self.inner.notify.clone();
        self.inner.executor.spawn_after(
            Duration::from_millis(wait_ms),
            async move {
                notify.deliver(&timer_id, ResponseData::Payload(Value::Null));
            }
            .boxed(),
        );
        Ok(())
    }

    /// Registers an execution wait for a node.
    ///
    /// A concurrent abort or expiry may have finalized the node before the
    /// wait existed; the wait is then interrupted straight away.
    async fn park<I>(&self, id: NodeExecutionId, ids: I, continuation: Continuation) -> Result<()>
    where
        I: IntoIterator<Item = CorrelationId>,
    {
        self.notify().register_all(ids, continuation)?;

        let current = self.node_executions().get(id).await?;
        if current.is_final() {
            let failure = current
                .failure_info
                .clone()
                .unwrap_or_else(|| FailureInfo::new(format!("node execution {}", current.status)));
            self.notify().interrupt(id, failure);
        }
        Ok(())
    }
}

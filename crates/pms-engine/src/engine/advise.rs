//! Completing attempts and applying advise decisions.

use serde_json::Value;

use super::node::Lineage;
use super::OrchestrationEngine;
use crate::TRACING_TARGET_ENGINE;
use crate::advise::{AdviserOutcome, AdviserResponse, AdvisingContext};
use crate::error::{Error, ErrorKind, Result};
use crate::execution::{NodeExecution, UpdateNodeExecution};
use crate::notify::{Continuation, ResponseData, StepNotify, WakePhase};
use crate::types::{FailureInfo, NodeExecutionId, PlanNodeId, Status, StepResponse};

impl OrchestrationEngine {
    /// Writes the final status of an attempt and advises it.
    ///
    /// If the attempt already reached a final status (an abort or an expiry
    /// got there first) the response is dropped and the attempt is advised
    /// with the status it has.
    pub(crate) async fn handle_step_response(&self, id: NodeExecutionId, response: StepResponse) -> Result<()> {
        match self.node_executions().finish(id, &response).await? {
            Some(execution) => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %id,
                    status = %execution.status,
                    "node execution finished"
                );
                self.advise(execution).await
            }
            None => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %id,
                    status = %response.status,
                    "step response superseded by a final status"
                );
                self.conclude(id).await
            }
        }
    }

    /// Advises an attempt whose status was finalized elsewhere, unless it
    /// was already advised.
    pub(crate) async fn conclude(&self, id: NodeExecutionId) -> Result<()> {
        let execution = self.node_executions().get(id).await?;
        if !execution.is_final() {
            return Err(Error::internal().with_message(format!(
                "node execution {id} rejected a transition while {}",
                execution.status
            )));
        }
        if execution.adviser_response.is_some() {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %id,
                "node execution already advised"
            );
            return Ok(());
        }
        self.advise(execution).await
    }

    async fn advise(&self, execution: NodeExecution) -> Result<()> {
        let outcome = match self.consult_advisers(&execution).await {
            Ok(outcome) => outcome,
            Err(error) => return self.force_errored(execution, error).await,
        };

        match outcome {
            AdviserOutcome::Decided(response) => self.handle_advise(execution, response).await,
            AdviserOutcome::Deferred(correlation_id) => {
                let continuation = Continuation::AdviseResume {
                    node_execution_id: execution.id,
                };
                if let Err(error) = self.notify().register(correlation_id.clone(), continuation) {
                    if error.kind() == ErrorKind::Conflict && self.notify().is_registered(&correlation_id) {
                        tracing::debug!(
                            target: TRACING_TARGET_ENGINE,
                            node_execution_id = %execution.id,
                            correlation_id = %correlation_id,
                            "advise already deferred"
                        );
                        return Ok(());
                    }
                    return self.force_errored(execution, error).await;
                }
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %execution.id,
                    correlation_id = %correlation_id,
                    "advise deferred"
                );

                // An abort that listed the awaiting attempts before this
                // registration could not interrupt it.
                let plan_execution = self
                    .plan_executions()
                    .get(execution.plan_execution_id)
                    .await?;
                if plan_execution.status == Status::Discontinuing || plan_execution.status.is_final() {
                    let failure = FailureInfo::new("plan execution aborted");
                    self.notify().interrupt(execution.id, failure);
                }
                Ok(())
            }
        }
    }

    async fn consult_advisers(&self, execution: &NodeExecution) -> Result<AdviserOutcome> {
        for obtainment in &execution.node.adviser_obtainments {
            let adviser = self.inner.advisers.get(&obtainment.adviser_type)?;
            let ctx = AdvisingContext {
                node_execution: execution,
                parameters: &obtainment.parameters,
            };
            if adviser.can_advise(ctx)? {
                return adviser.advise(ctx).await;
            }
        }
        Ok(AdviserOutcome::Decided(AdviserResponse::Unknown))
    }

    /// Applies an advise decision to a finished attempt.
    pub(crate) async fn handle_advise(&self, execution: NodeExecution, response: AdviserResponse) -> Result<()> {
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %execution.id,
            status = %execution.status,
            advise = response.as_str(),
            "applying advise"
        );

        let Some(execution) = self
            .node_executions()
            .record_advise(execution.id, response.clone())
            .await?
        else {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %execution.id,
                advise = response.as_str(),
                "node execution already advised, advise dropped"
            );
            return Ok(());
        };

        let transition = match response {
            AdviserResponse::Unknown => return self.end_node_execution(execution).await,
            AdviserResponse::NextStep { next_node_id } => self.next_step(&execution, next_node_id).await,
            AdviserResponse::Retry {
                wait_ms,
                new_parameters,
            } => self.retry(&execution, wait_ms, new_parameters).await,
            AdviserResponse::MarkStatus { status } => return self.mark_status(execution, status).await,
            AdviserResponse::IgnoreFailure { next_node_id } => {
                let execution = self
                    .overwrite_broken(execution, Status::IgnoreFailed)
                    .await?;
                match next_node_id {
                    Some(next_node_id) => match self.next_step(&execution, next_node_id).await {
                        Ok(()) => return Ok(()),
                        Err(error) => return self.force_errored(execution, error).await,
                    },
                    None => return self.end_node_execution(execution).await,
                }
            }
            AdviserResponse::EndPlan => return self.end_plan_now(execution).await,
        };

        match transition {
            Ok(()) => Ok(()),
            Err(error) => self.force_errored(execution, error).await,
        }
    }

    /// Applies an advise decision that arrived through the SDK.
    pub(crate) async fn apply_external_advise(&self, id: NodeExecutionId, response: AdviserResponse) -> Result<()> {
        let execution = self.node_executions().get(id).await?;
        if !execution.is_final() || execution.adviser_response.is_some() {
            tracing::warn!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %id,
                status = %execution.status,
                advised = execution.adviser_response.is_some(),
                "node execution not awaiting advise, advise ignored"
            );
            return Ok(());
        }
        self.handle_advise(execution, response).await
    }

    async fn next_step(&self, execution: &NodeExecution, next_node_id: PlanNodeId) -> Result<()> {
        let plan = self
            .plan_executions()
            .find_plan(execution.ambiance.plan_id)
            .await?;
        let node = plan.fetch_node(next_node_id)?.clone();
        let lineage = Lineage {
            parent_id: execution.parent_id,
            previous_id: Some(execution.id),
            notify_id: execution.notify_id.clone(),
            retry_ids: Vec::new(),
        };

        let next = self
            .trigger_node(&execution.ambiance.clone_for_finish(), node, lineage)
            .await?;
        let update = UpdateNodeExecution {
            next_id: Some(next.id),
            ..UpdateNodeExecution::default()
        };
        self.node_executions().update(execution.id, update).await?;
        Ok(())
    }

    async fn retry(&self, execution: &NodeExecution, wait_ms: u64, new_parameters: Option<Value>) -> Result<()> {
        let node = match new_parameters {
            Some(parameters) => execution.node.clone_for_retry(Some(parameters)),
            None => execution.node.clone(),
        };
        let mut retry_ids = execution.retry_ids.clone();
        retry_ids.push(execution.id);
        let attempt = retry_ids.len();
        let lineage = Lineage {
            parent_id: execution.parent_id,
            previous_id: execution.previous_id,
            notify_id: execution.notify_id.clone(),
            retry_ids,
        };

        let base = execution.ambiance.clone_for_finish();
        let retry = self.create_node_execution(&base, node, lineage).await?;
        self.node_executions().mark_retried(execution.id).await?;

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %execution.id,
            retry_id = %retry.id,
            attempt,
            wait_ms,
            "retrying node"
        );

        if wait_ms == 0 {
            self.submit(super::EngineTask::Start(retry.id));
            return Ok(());
        }

        let waiting = self
            .node_executions()
            .update_status(retry.id, Status::TimedWaiting, &[Status::Queued], UpdateNodeExecution::default())
            .await?;
        if waiting.is_none() {
            // Aborted while queued; starting it ends it.
            self.submit(super::EngineTask::Start(retry.id));
            return Ok(());
        }
        self.schedule_wake(retry.id, wait_ms, WakePhase::Start).await
    }

    async fn mark_status(&self, execution: NodeExecution, status: Status) -> Result<()> {
        if !status.is_final() {
            let error = Error::configuration()
                .with_message(format!("MARK_STATUS needs a final status, got {status}"));
            return self.force_errored(execution, error).await;
        }
        let execution = self.overwrite_broken(execution, status).await?;
        self.end_node_execution(execution).await
    }

    /// Overrides a broken final status. A non-broken attempt keeps its own.
    async fn overwrite_broken(&self, execution: NodeExecution, status: Status) -> Result<NodeExecution> {
        let updated = self
            .node_executions()
            .update_status(execution.id, status, Status::BROKEN, UpdateNodeExecution::default())
            .await?;
        Ok(match updated {
            Some(updated) => updated,
            None => {
                tracing::warn!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %execution.id,
                    from = %execution.status,
                    to = %status,
                    "status override rejected"
                );
                execution
            }
        })
    }

    /// Ends the plan execution with this attempt's status, aborting every
    /// other active leaf and failing every other deferred advise.
    async fn end_plan_now(&self, execution: NodeExecution) -> Result<()> {
        let plan_execution_id = execution.plan_execution_id;
        let failure = FailureInfo::new(format!("plan ended by {}", execution.node.identifier));
        for leaf in self
            .node_executions()
            .list_active_leaves(plan_execution_id)
            .await?
        {
            if leaf.id != execution.id {
                self.abort_node(leaf.id, failure.clone()).await?;
            }
        }
        for awaiting in self
            .node_executions()
            .list_awaiting_advise(plan_execution_id)
            .await?
        {
            if awaiting.id != execution.id {
                self.notify().interrupt(awaiting.id, failure.clone());
            }
        }

        let status = Status::aggregate([execution.status]);
        self.finalize_plan(plan_execution_id, status).await?;
        self.end_node_execution(execution).await
    }

    /// Ends an attempt whose chain is complete: its parent is notified, or
    /// the plan execution ends when there is no parent.
    pub(crate) async fn end_node_execution(&self, execution: NodeExecution) -> Result<()> {
        match (execution.parent_id, &execution.notify_id) {
            (None, _) => {
                let finalization = self.end_plan_execution(&execution).await?;
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %execution.id,
                    finalization = ?finalization,
                    "top-level chain ended"
                );
                Ok(())
            }
            (Some(parent_id), Some(notify_id)) => {
                let notify = StepNotify {
                    node_execution_id: execution.id,
                    status: execution.status,
                };
                let outcome = self
                    .notify()
                    .deliver(notify_id, ResponseData::StepNotify(notify));
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    node_execution_id = %execution.id,
                    parent_id = %parent_id,
                    status = %execution.status,
                    outcome = ?outcome,
                    "parent notified"
                );
                Ok(())
            }
            (Some(parent_id), None) => Err(Error::internal().with_message(format!(
                "child {} of {parent_id} has no notify id",
                execution.id
            ))),
        }
    }

    /// Ends an attempt `ERRORED` after an invariant violation during
    /// advising.
    ///
    /// This is the one path that overwrites a positive final status.
    async fn force_errored(&self, execution: NodeExecution, error: Error) -> Result<()> {
        tracing::error!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %execution.id,
            status = %execution.status,
            error = %error,
            "advising failed, forcing ERRORED"
        );
        let update = UpdateNodeExecution {
            failure_info: Some(FailureInfo::from(&error)),
            ..UpdateNodeExecution::default()
        };
        let execution = self
            .node_executions()
            .update_status(execution.id, Status::Errored, Status::FINAL, update)
            .await?
            .unwrap_or(execution);
        self.end_node_execution(execution).await
    }
}

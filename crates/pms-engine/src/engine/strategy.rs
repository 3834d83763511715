//! Plan execution start and end.

use tokio::sync::broadcast::error::RecvError;

use super::node::Lineage;
use super::{Finalization, OrchestrationEngine};
use crate::TRACING_TARGET_ENGINE;
use crate::error::{Error, Result};
use crate::event::{OrchestrationEvent, OrchestrationEventType};
use crate::execution::{NodeExecution, PlanExecution};
use crate::observer::OrchestrationStartInfo;
use crate::plan::Plan;
use crate::types::{Ambiance, ExecutionMetadata, PlanExecutionId, Status};

impl OrchestrationEngine {
    /// Starts a plan execution.
    ///
    /// Start observers and the `ORCHESTRATION_START` event fire before the
    /// starting node is submitted to the worker pool. Returns as soon as the
    /// starting node is queued.
    pub async fn start_execution(&self, plan: Plan, metadata: ExecutionMetadata) -> Result<PlanExecution> {
        let plan = self.plan_executions().save_plan(plan).await?;
        let execution = PlanExecution::new(plan.id(), metadata.clone());
        let ambiance = Ambiance::new(plan.id(), execution.id)
            .with_setup_abstractions(plan.setup_abstractions().clone())
            .with_metadata(metadata.clone());
        let execution = self
            .plan_executions()
            .create(execution.with_ambiance(ambiance.clone()))
            .await?;

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            plan_execution_id = %execution.id,
            plan_id = %plan.id(),
            nodes = plan.len(),
            "plan execution started"
        );

        let starting_node = match plan.fetch_starting_node() {
            Ok(node) => node.clone(),
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET_ENGINE,
                    plan_execution_id = %execution.id,
                    error = %error,
                    "starting node missing"
                );
                self.finalize_plan(execution.id, Status::Errored).await?;
                return Err(error);
            }
        };

        let info = OrchestrationStartInfo {
            ambiance: ambiance.clone(),
            metadata,
        };
        self.inner
            .start_subject
            .fire_inform(move |observer| observer.on_start(&info));
        self.emit(OrchestrationEventType::OrchestrationStart, &execution)
            .await;

        self.trigger_node(&ambiance, starting_node, Lineage::default())
            .await?;
        Ok(execution)
    }

    /// Ends a plan execution after its top-level chain finished with
    /// `node_execution`.
    ///
    /// The status is aggregated from every other current attempt plus the
    /// finishing one, then written conditionally; see
    /// [`Finalization`] for the possible outcomes.
    pub async fn end_plan_execution(&self, node_execution: &NodeExecution) -> Result<Finalization> {
        let plan_execution_id = node_execution.plan_execution_id;
        let others = self
            .plan_executions()
            .calculate_status_excluding(plan_execution_id, node_execution.id)
            .await?;
        let status = Status::aggregate([others, node_execution.status]);

        if status.is_flowing() {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                plan_execution_id = %plan_execution_id,
                node_execution_id = %node_execution.id,
                status = %status,
                "plan execution still has flowing nodes"
            );
            return Ok(Finalization::Pending(status));
        }

        self.finalize_plan(plan_execution_id, status).await
    }

    /// Writes a final plan status.
    ///
    /// Each attempt re-reads the record and writes conditionally on the
    /// status it read. When every attempt is rejected while the record is
    /// still not final, `ERRORED` is forced.
    pub(crate) async fn finalize_plan(&self, id: PlanExecutionId, status: Status) -> Result<Finalization> {
        let attempts = self.config().finalize_attempts;
        for attempt in 1..=attempts {
            let current = self.plan_executions().get(id).await?;
            if current.is_final() {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    plan_execution_id = %id,
                    status = %current.status,
                    "plan execution already final"
                );
                return Ok(Finalization::Superseded(current.status));
            }

            match self
                .plan_executions()
                .update_status(id, status, &[current.status])
                .await?
            {
                Some(updated) => {
                    self.on_plan_end(&updated).await;
                    return Ok(Finalization::Accepted(status));
                }
                None => tracing::warn!(
                    target: TRACING_TARGET_ENGINE,
                    plan_execution_id = %id,
                    attempt,
                    expected = %current.status,
                    "final status write rejected"
                ),
            }
        }

        tracing::error!(
            target: TRACING_TARGET_ENGINE,
            plan_execution_id = %id,
            attempts,
            status = %status,
            "final status could not be written, forcing ERRORED"
        );
        match self
            .plan_executions()
            .update_status(id, Status::Errored, Status::FLOWING)
            .await?
        {
            Some(updated) => {
                self.on_plan_end(&updated).await;
                Ok(Finalization::FellBack)
            }
            None => {
                let current = self.plan_executions().get(id).await?;
                Ok(Finalization::Superseded(current.status))
            }
        }
    }

    /// Waits until a plan execution reaches its final status.
    pub async fn wait_for_completion(&self, id: PlanExecutionId) -> Result<PlanExecution> {
        let mut ends = self.inner.ends.subscribe();
        let execution = self.plan_executions().get(id).await?;
        if execution.is_final() {
            return Ok(execution);
        }

        loop {
            match ends.recv().await {
                Ok(ended) if ended == id => return self.plan_executions().get(id).await,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    let execution = self.plan_executions().get(id).await?;
                    if execution.is_final() {
                        return Ok(execution);
                    }
                }
                Err(RecvError::Closed) => {
                    return Err(Error::internal().with_message("engine shut down"));
                }
            }
        }
    }

    async fn on_plan_end(&self, execution: &PlanExecution) {
        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            plan_execution_id = %execution.id,
            status = %execution.status,
            "plan execution finished"
        );

        self.emit(OrchestrationEventType::OrchestrationEnd, execution)
            .await;
        let ambiance = execution.ambiance.clone();
        let status = execution.status;
        self.inner
            .end_subject
            .fire_inform(move |observer| observer.on_end(&ambiance, status));
        // No receiver just means nobody is waiting.
        let _ = self.inner.ends.send(execution.id);
    }

    async fn emit(&self, event_type: OrchestrationEventType, execution: &PlanExecution) {
        let event = OrchestrationEvent::new(event_type, execution.ambiance.clone(), execution.status);
        if let Err(error) = self.inner.events.emit(event).await {
            tracing::warn!(
                target: TRACING_TARGET_ENGINE,
                plan_execution_id = %execution.id,
                event_type = %event_type,
                error = %error,
                "orchestration event not emitted"
            );
        }
    }
}

//! Aborts and expiries.

use super::OrchestrationEngine;
use crate::TRACING_TARGET_ENGINE;
use crate::error::{Error, Result};
use crate::execution::UpdateNodeExecution;
use crate::types::{FailureInfo, FailureType, NodeExecutionId, PlanExecutionId, Status};

impl OrchestrationEngine {
    /// Aborts a running plan execution.
    ///
    /// The plan execution moves to `DISCONTINUING` so no new node starts,
    /// then every active leaf is aborted. Their waits are interrupted and
    /// each one is advised, which ends the plan `ABORTED` once the last
    /// chain finishes. Attempts already final but waiting on a deferred
    /// advise have that wait failed, which advises them `UNKNOWN`.
    /// Returns the number of leaves aborted.
    pub async fn abort_plan_execution(&self, id: PlanExecutionId) -> Result<usize> {
        let discontinuing = self
            .plan_executions()
            .update_status(id, Status::Discontinuing, Status::FLOWING)
            .await?;
        if discontinuing.is_none() {
            let current = self.plan_executions().get(id).await?;
            return Err(Error::conflict().with_message(format!(
                "plan execution {id} cannot be aborted while {}",
                current.status
            )));
        }

        let failure = FailureInfo::new("plan execution aborted");
        let mut aborted = 0;
        for leaf in self.node_executions().list_active_leaves(id).await? {
            if self.abort_node(leaf.id, failure.clone()).await? {
                aborted += 1;
            }
        }

        // Final attempts parked on a deferred advise have no flowing status
        // to abort. Failing their wait ends the chain with the status they
        // already have.
        for awaiting in self.node_executions().list_awaiting_advise(id).await? {
            let interrupted = self.notify().interrupt(awaiting.id, failure.clone());
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                node_execution_id = %awaiting.id,
                interrupted,
                "deferred advise interrupted"
            );
        }

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            plan_execution_id = %id,
            aborted,
            "plan execution aborting"
        );
        Ok(aborted)
    }

    /// Moves a flowing attempt to `ABORTED` and interrupts its waits.
    ///
    /// Returns `false` if the attempt had already reached a final status.
    pub(crate) async fn abort_node(&self, id: NodeExecutionId, failure: FailureInfo) -> Result<bool> {
        let update = UpdateNodeExecution {
            failure_info: Some(failure.clone()),
            ..UpdateNodeExecution::default()
        };
        let aborted = self
            .node_executions()
            .update_status(id, Status::Aborted, Status::FLOWING, update)
            .await?;
        if aborted.is_none() {
            return Ok(false);
        }

        let interrupted = self.notify().interrupt(id, failure);
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            interrupted,
            "node execution aborted"
        );
        Ok(true)
    }

    /// Moves a flowing attempt to `EXPIRED` and interrupts its waits.
    ///
    /// Returns `false` if the attempt had already reached a final status,
    /// which is the common case for a timeout that fired after the work
    /// answered.
    pub async fn expire_node_execution(&self, id: NodeExecutionId) -> Result<bool> {
        let failure = FailureInfo::new("node execution timed out").with_type(FailureType::Timeout);
        let update = UpdateNodeExecution {
            failure_info: Some(failure.clone()),
            ..UpdateNodeExecution::default()
        };
        let expired = self
            .node_executions()
            .update_status(id, Status::Expired, Status::FLOWING, update)
            .await?;
        if expired.is_none() {
            return Ok(false);
        }

        let interrupted = self.notify().interrupt(id, failure);
        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %id,
            interrupted,
            "node execution expired"
        );
        Ok(true)
    }
}

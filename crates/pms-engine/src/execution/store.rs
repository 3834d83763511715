//! Repository traits for plans and execution records.
//!
//! Status writes are conditional: every method that changes a status takes
//! the set of statuses the record may currently be in and returns `None`
//! when the record was in any other status. Callers must handle `None`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{NodeExecution, PlanExecution, UpdateNodeExecution};
use crate::advise::AdviserResponse;
use crate::error::Result;
use crate::plan::Plan;
use crate::types::{NodeExecutionId, PlanExecutionId, PlanId, Status};

/// Storage for compiled plans.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Persists a plan. Plans are immutable; saving an id twice is a conflict.
    async fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>>;

    /// Finds a plan by id.
    async fn find_plan(&self, plan_id: PlanId) -> Result<Arc<Plan>>;
}

/// Storage for plan execution records.
#[async_trait]
pub trait PlanExecutionRepository: Send + Sync {
    /// Persists a new plan execution.
    async fn create_plan_execution(&self, execution: PlanExecution) -> Result<PlanExecution>;

    /// Finds a plan execution by id.
    async fn find_plan_execution(&self, id: PlanExecutionId) -> Result<PlanExecution>;

    /// Writes `status` if the record is currently in `allowed_from`.
    ///
    /// A final status also sets `end_ts`, which is only ever written once.
    async fn update_plan_execution_status(
        &self,
        id: PlanExecutionId,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<Option<PlanExecution>>;
}

/// Storage for node execution records.
#[async_trait]
pub trait NodeExecutionRepository: Send + Sync {
    /// Persists a new node execution.
    async fn create_node_execution(&self, execution: NodeExecution) -> Result<NodeExecution>;

    /// Finds a node execution by id.
    async fn find_node_execution(&self, id: NodeExecutionId) -> Result<NodeExecution>;

    /// Applies `update` if the record is currently in `allowed_from`.
    ///
    /// `None` for `allowed_from` applies the update unconditionally; it is
    /// only used for updates that do not touch the status.
    async fn update_node_execution(
        &self,
        id: NodeExecutionId,
        update: UpdateNodeExecution,
        allowed_from: Option<&[Status]>,
    ) -> Result<Option<NodeExecution>>;

    /// Records the adviser decision if the attempt has none yet.
    ///
    /// Returns `None` when a decision was already recorded, so exactly one
    /// caller advises each attempt.
    async fn record_adviser_response(
        &self,
        id: NodeExecutionId,
        response: AdviserResponse,
    ) -> Result<Option<NodeExecution>>;

    /// Lists every node execution of a plan execution, oldest first.
    async fn list_node_executions(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<NodeExecution>>;

    /// Lists the direct children of a node execution, oldest first.
    async fn list_children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>>;
}

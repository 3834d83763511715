//! Services over the execution repositories.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::{
    NodeExecution, NodeExecutionRepository, PlanExecution, PlanExecutionRepository,
    PlanRepository, UpdateNodeExecution,
};
use crate::TRACING_TARGET_STORE;
use crate::advise::AdviserResponse;
use crate::error::{Error, Result};
use crate::observer::{NodeStatusUpdateObserver, NodeUpdateInfo, Subject};
use crate::plan::{Plan, RefObject};
use crate::types::{NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId, Status, StepResponse};

/// Plan and plan execution access, plus status aggregation.
#[derive(Clone)]
pub struct PlanExecutionService {
    plans: Arc<dyn PlanRepository>,
    executions: Arc<dyn PlanExecutionRepository>,
    nodes: Arc<dyn NodeExecutionRepository>,
}

impl std::fmt::Debug for PlanExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutionService").finish_non_exhaustive()
    }
}

impl PlanExecutionService {
    /// Creates the service.
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        executions: Arc<dyn PlanExecutionRepository>,
        nodes: Arc<dyn NodeExecutionRepository>,
    ) -> Self {
        Self {
            plans,
            executions,
            nodes,
        }
    }

    /// Persists a plan.
    pub async fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>> {
        self.plans.save_plan(plan).await
    }

    /// Finds a plan.
    pub async fn find_plan(&self, plan_id: PlanId) -> Result<Arc<Plan>> {
        self.plans.find_plan(plan_id).await
    }

    /// Persists a new plan execution.
    pub async fn create(&self, execution: PlanExecution) -> Result<PlanExecution> {
        self.executions.create_plan_execution(execution).await
    }

    /// Finds a plan execution.
    pub async fn get(&self, id: PlanExecutionId) -> Result<PlanExecution> {
        self.executions.find_plan_execution(id).await
    }

    /// Conditionally writes a status; `None` means the write was rejected.
    pub async fn update_status(
        &self,
        id: PlanExecutionId,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<Option<PlanExecution>> {
        self.executions
            .update_plan_execution_status(id, status, allowed_from)
            .await
    }

    /// Aggregates the status of every current attempt of the plan execution.
    pub async fn calculate_status(&self, id: PlanExecutionId) -> Result<Status> {
        let executions = self.nodes.list_node_executions(id).await?;
        Ok(aggregate(&executions, None))
    }

    /// Like [`calculate_status`](Self::calculate_status) without one node
    /// execution, typically the one being finalized.
    pub async fn calculate_status_excluding(
        &self,
        id: PlanExecutionId,
        excluded: NodeExecutionId,
    ) -> Result<Status> {
        let executions = self.nodes.list_node_executions(id).await?;
        Ok(aggregate(&executions, Some(excluded)))
    }
}

fn aggregate(executions: &[NodeExecution], excluded: Option<NodeExecutionId>) -> Status {
    Status::aggregate(
        executions
            .iter()
            .filter(|execution| !execution.old_retry && Some(execution.id) != excluded)
            .map(|execution| execution.status),
    )
}

/// Node execution access.
///
/// Every accepted status write is reported to the registered
/// [`NodeStatusUpdateObserver`]s.
#[derive(Clone)]
pub struct NodeExecutionService {
    nodes: Arc<dyn NodeExecutionRepository>,
    status_subject: Arc<Subject<dyn NodeStatusUpdateObserver>>,
}

impl std::fmt::Debug for NodeExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutionService")
            .field("status_subject", &self.status_subject)
            .finish_non_exhaustive()
    }
}

impl NodeExecutionService {
    /// Creates the service.
    pub fn new(
        nodes: Arc<dyn NodeExecutionRepository>,
        status_subject: Arc<Subject<dyn NodeStatusUpdateObserver>>,
    ) -> Self {
        Self {
            nodes,
            status_subject,
        }
    }

    /// Returns the status update subject.
    pub fn status_subject(&self) -> &Subject<dyn NodeStatusUpdateObserver> {
        &self.status_subject
    }

    /// Persists a new node execution.
    pub async fn create(&self, execution: NodeExecution) -> Result<NodeExecution> {
        let execution = self.nodes.create_node_execution(execution).await?;
        self.inform(&execution);
        Ok(execution)
    }

    /// Finds a node execution.
    pub async fn get(&self, id: NodeExecutionId) -> Result<NodeExecution> {
        self.nodes.find_node_execution(id).await
    }

    /// Applies an update that does not change the status.
    pub async fn update(&self, id: NodeExecutionId, update: UpdateNodeExecution) -> Result<NodeExecution> {
        debug_assert!(update.status.is_none());
        self.nodes
            .update_node_execution(id, update, None)
            .await?
            .ok_or_else(|| Error::internal().with_message(format!("unconditional update of {id} rejected")))
    }

    /// Conditionally writes a status along with `update`.
    ///
    /// Returns `None` when the record was not in `allowed_from`.
    pub async fn update_status(
        &self,
        id: NodeExecutionId,
        status: Status,
        allowed_from: &[Status],
        update: UpdateNodeExecution,
    ) -> Result<Option<NodeExecution>> {
        let update = UpdateNodeExecution {
            status: Some(status),
            end_ts: update.end_ts.or_else(|| status.is_final().then(jiff::Timestamp::now)),
            ..update
        };
        let updated = self
            .nodes
            .update_node_execution(id, update, Some(allowed_from))
            .await?;
        if let Some(execution) = &updated {
            self.inform(execution);
        }
        Ok(updated)
    }

    /// Claims the advise phase of an attempt by recording its decision.
    ///
    /// Returns `None` when another caller recorded a decision first.
    pub async fn record_advise(
        &self,
        id: NodeExecutionId,
        response: AdviserResponse,
    ) -> Result<Option<NodeExecution>> {
        self.nodes.record_adviser_response(id, response).await
    }

    /// Lists final attempts that were never advised. These are attempts
    /// whose advise is deferred or still being decided.
    pub async fn list_awaiting_advise(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<NodeExecution>> {
        let executions = self.list_current(plan_execution_id).await?;
        Ok(executions
            .into_iter()
            .filter(|e| e.is_final() && e.adviser_response.is_none())
            .collect())
    }

    /// Writes the final response of an attempt if it is still flowing.
    pub async fn finish(&self, id: NodeExecutionId, response: &StepResponse) -> Result<Option<NodeExecution>> {
        self.update_status(
            id,
            response.status,
            Status::FLOWING,
            UpdateNodeExecution::finish(response),
        )
        .await
    }

    /// Marks an attempt as superseded by a retry.
    pub async fn mark_retried(&self, id: NodeExecutionId) -> Result<NodeExecution> {
        self.update(
            id,
            UpdateNodeExecution {
                old_retry: Some(true),
                ..UpdateNodeExecution::default()
            },
        )
        .await
    }

    /// Lists the current (non-superseded) attempts of a plan execution.
    pub async fn list_current(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<NodeExecution>> {
        let executions = self.nodes.list_node_executions(plan_execution_id).await?;
        Ok(executions.into_iter().filter(|e| !e.old_retry).collect())
    }

    /// Lists the current attempts spawned by a parent.
    pub async fn list_children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>> {
        let children = self.nodes.list_children(parent_id).await?;
        Ok(children.into_iter().filter(|e| !e.old_retry).collect())
    }

    /// Lists the current attempts that have not reached a final status and
    /// have no children of their own.
    pub async fn list_active_leaves(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<NodeExecution>> {
        let executions = self.list_current(plan_execution_id).await?;
        Ok(executions
            .into_iter()
            .filter(|e| !e.is_final() && e.is_leaf())
            .collect())
    }

    /// Finds the latest current attempt of a plan node, following retries.
    pub async fn find_latest_for_node(
        &self,
        plan_execution_id: PlanExecutionId,
        plan_node_id: PlanNodeId,
    ) -> Result<Option<NodeExecution>> {
        let executions = self.list_current(plan_execution_id).await?;
        Ok(executions
            .into_iter()
            .filter(|e| e.node.id == plan_node_id || e.node.retry_of == Some(plan_node_id))
            .max_by_key(|e| e.start_ts))
    }

    /// Resolves ref objects against producer outcomes.
    ///
    /// An unresolved reference is a step error: the consuming node fails
    /// through the ordinary advise path.
    pub async fn resolve_inputs(
        &self,
        plan_execution_id: PlanExecutionId,
        ref_objects: &[RefObject],
    ) -> Result<BTreeMap<String, Value>> {
        let mut inputs = BTreeMap::new();
        for ref_object in ref_objects {
            let producer = self
                .find_latest_for_node(plan_execution_id, ref_object.producer)
                .await?;
            let value = producer
                .as_ref()
                .and_then(|execution| execution.outcomes.get(&ref_object.key))
                .cloned()
                .ok_or_else(|| {
                    Error::step().with_message(format!(
                        "ref object {} unresolved: {} has no outcome {}",
                        ref_object.name, ref_object.producer, ref_object.key
                    ))
                })?;
            inputs.insert(ref_object.name.clone(), value);
        }
        Ok(inputs)
    }

    fn inform(&self, execution: &NodeExecution) {
        tracing::trace!(
            target: TRACING_TARGET_STORE,
            node_execution_id = %execution.id,
            status = %execution.status,
            "node execution status written"
        );
        if self.status_subject.is_empty() {
            return;
        }
        let info = NodeUpdateInfo {
            node_execution_id: execution.id,
            ambiance: execution.ambiance.clone(),
            status: execution.status,
        };
        self.status_subject
            .fire_inform(move |observer| observer.on_node_status_update(&info));
    }
}

//! In-memory implementation of the repositories.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use super::{
    NodeExecution, NodeExecutionRepository, PlanExecution, PlanExecutionRepository,
    PlanRepository, UpdateNodeExecution,
};
use crate::TRACING_TARGET_STORE;
use crate::advise::AdviserResponse;
use crate::error::{Error, Result};
use crate::plan::Plan;
use crate::types::{NodeExecutionId, PlanExecutionId, PlanId, Status};

#[derive(Default)]
struct State {
    plans: HashMap<PlanId, Arc<Plan>>,
    plan_executions: HashMap<PlanExecutionId, PlanExecution>,
    node_executions: HashMap<NodeExecutionId, NodeExecution>,
    by_plan_execution: HashMap<PlanExecutionId, Vec<NodeExecutionId>>,
    by_parent: HashMap<NodeExecutionId, Vec<NodeExecutionId>>,
}

/// Process-local store backing all three repositories.
///
/// Conditional writes are evaluated under a single write lock, so a
/// compare-and-set on one record is atomic with respect to every other
/// writer.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>> {
        let mut state = self.state.write().await;
        if state.plans.contains_key(&plan.id()) {
            return Err(Error::conflict().with_message(format!("plan {} already saved", plan.id())));
        }
        let plan = Arc::new(plan);
        state.plans.insert(plan.id(), Arc::clone(&plan));
        Ok(plan)
    }

    async fn find_plan(&self, plan_id: PlanId) -> Result<Arc<Plan>> {
        let state = self.state.read().await;
        state
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| Error::not_found().with_message(format!("plan {plan_id}")))
    }
}

#[async_trait]
impl PlanExecutionRepository for MemoryStore {
    async fn create_plan_execution(&self, execution: PlanExecution) -> Result<PlanExecution> {
        let mut state = self.state.write().await;
        if state.plan_executions.contains_key(&execution.id) {
            return Err(Error::conflict()
                .with_message(format!("plan execution {} already exists", execution.id)));
        }
        state.plan_executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find_plan_execution(&self, id: PlanExecutionId) -> Result<PlanExecution> {
        let state = self.state.read().await;
        state
            .plan_executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found().with_message(format!("plan execution {id}")))
    }

    async fn update_plan_execution_status(
        &self,
        id: PlanExecutionId,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<Option<PlanExecution>> {
        let mut state = self.state.write().await;
        let record = state
            .plan_executions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found().with_message(format!("plan execution {id}")))?;

        if !allowed_from.contains(&record.status) {
            tracing::warn!(
                target: TRACING_TARGET_STORE,
                plan_execution_id = %id,
                current = %record.status,
                requested = %status,
                "plan execution status write rejected"
            );
            return Ok(None);
        }

        record.status = status;
        if status.is_final() && record.end_ts.is_none() {
            record.end_ts = Some(Timestamp::now());
        }
        record.version += 1;
        Ok(Some(record.clone()))
    }
}

#[async_trait]
impl NodeExecutionRepository for MemoryStore {
    async fn create_node_execution(&self, execution: NodeExecution) -> Result<NodeExecution> {
        let mut state = self.state.write().await;
        if state.node_executions.contains_key(&execution.id) {
            return Err(Error::conflict()
                .with_message(format!("node execution {} already exists", execution.id)));
        }
        state
            .by_plan_execution
            .entry(execution.plan_execution_id)
            .or_default()
            .push(execution.id);
        if let Some(parent_id) = execution.parent_id {
            state.by_parent.entry(parent_id).or_default().push(execution.id);
        }
        state.node_executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find_node_execution(&self, id: NodeExecutionId) -> Result<NodeExecution> {
        let state = self.state.read().await;
        state
            .node_executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found().with_message(format!("node execution {id}")))
    }

    async fn update_node_execution(
        &self,
        id: NodeExecutionId,
        update: UpdateNodeExecution,
        allowed_from: Option<&[Status]>,
    ) -> Result<Option<NodeExecution>> {
        let mut state = self.state.write().await;
        let record = state
            .node_executions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found().with_message(format!("node execution {id}")))?;

        if let Some(allowed_from) = allowed_from
            && !allowed_from.contains(&record.status)
        {
            tracing::debug!(
                target: TRACING_TARGET_STORE,
                node_execution_id = %id,
                current = %record.status,
                requested = ?update.status,
                "node execution write rejected"
            );
            return Ok(None);
        }

        update.apply(record);
        Ok(Some(record.clone()))
    }

    async fn record_adviser_response(
        &self,
        id: NodeExecutionId,
        response: AdviserResponse,
    ) -> Result<Option<NodeExecution>> {
        let mut state = self.state.write().await;
        let record = state
            .node_executions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found().with_message(format!("node execution {id}")))?;

        if record.adviser_response.is_some() {
            tracing::debug!(
                target: TRACING_TARGET_STORE,
                node_execution_id = %id,
                "adviser response already recorded"
            );
            return Ok(None);
        }

        UpdateNodeExecution {
            adviser_response: Some(response),
            ..UpdateNodeExecution::default()
        }
        .apply(record);
        Ok(Some(record.clone()))
    }

    async fn list_node_executions(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<NodeExecution>> {
        let state = self.state.read().await;
        Ok(collect(&state, state.by_plan_execution.get(&plan_execution_id)))
    }

    async fn list_children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>> {
        let state = self.state.read().await;
        Ok(collect(&state, state.by_parent.get(&parent_id)))
    }
}

fn collect(state: &State, ids: Option<&Vec<NodeExecutionId>>) -> Vec<NodeExecution> {
    ids.into_iter()
        .flatten()
        .filter_map(|id| state.node_executions.get(id).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::plan::PlanNode;
    use crate::types::{Ambiance, ExecutionMetadata, StepType};

    fn plan() -> Plan {
        let node = PlanNode::new("a", StepType::new("NOOP"));
        Plan::builder()
            .starting_node_id(node.id)
            .add_node(node)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn plans_are_immutable() {
        let store = MemoryStore::new();
        let plan = plan();
        store.save_plan(plan.clone()).await.unwrap();
        let err = store.save_plan(plan.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.find_plan(plan.id()).await.unwrap().id(), plan.id());
    }

    #[tokio::test]
    async fn plan_execution_final_status_is_sticky() {
        let store = MemoryStore::new();
        let execution = store
            .create_plan_execution(PlanExecution::new(PlanId::new(), ExecutionMetadata::default()))
            .await
            .unwrap();

        let finished = store
            .update_plan_execution_status(execution.id, Status::Succeeded, Status::FLOWING)
            .await
            .unwrap()
            .unwrap();
        assert!(finished.end_ts.is_some());
        assert_eq!(finished.version, 1);

        let rejected = store
            .update_plan_execution_status(execution.id, Status::Errored, Status::FLOWING)
            .await
            .unwrap();
        assert!(rejected.is_none());
        let current = store.find_plan_execution(execution.id).await.unwrap();
        assert_eq!(current.status, Status::Succeeded);
        assert_eq!(current.end_ts, finished.end_ts);
    }

    #[tokio::test]
    async fn node_execution_conditional_update() {
        let store = MemoryStore::new();
        let plan_execution_id = PlanExecutionId::new();
        let parent = NodeExecution::new(
            NodeExecutionId::new(),
            plan_execution_id,
            PlanNode::new("p", StepType::new("NOOP")),
            Ambiance::new(PlanId::new(), plan_execution_id),
        );
        let mut child = parent.clone();
        child.id = NodeExecutionId::new();
        child.parent_id = Some(parent.id);

        store.create_node_execution(parent.clone()).await.unwrap();
        store.create_node_execution(child.clone()).await.unwrap();

        let running = store
            .update_node_execution(child.id, UpdateNodeExecution::status(Status::Running), Some(Status::FLOWING))
            .await
            .unwrap();
        assert_eq!(running.map(|r| r.status), Some(Status::Running));

        let rejected = store
            .update_node_execution(child.id, UpdateNodeExecution::status(Status::Queued), Some(&[Status::Queued]))
            .await
            .unwrap();
        assert!(rejected.is_none());

        assert_eq!(store.list_children(parent.id).await.unwrap().len(), 1);
        assert_eq!(store.list_node_executions(plan_execution_id).await.unwrap().len(), 2);
        assert!(store.list_children(child.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adviser_response_is_recorded_once() {
        let store = MemoryStore::new();
        let plan_execution_id = PlanExecutionId::new();
        let execution = NodeExecution::new(
            NodeExecutionId::new(),
            plan_execution_id,
            PlanNode::new("a", StepType::new("NOOP")),
            Ambiance::new(PlanId::new(), plan_execution_id),
        );
        store.create_node_execution(execution.clone()).await.unwrap();

        let first = store
            .record_adviser_response(execution.id, AdviserResponse::EndPlan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.adviser_response, Some(AdviserResponse::EndPlan));

        let second = store
            .record_adviser_response(execution.id, AdviserResponse::Unknown)
            .await
            .unwrap();
        assert!(second.is_none());

        let current = store.find_node_execution(execution.id).await.unwrap();
        assert_eq!(current.adviser_response, Some(AdviserResponse::EndPlan));
        assert_eq!(current.version, first.version);
    }
}

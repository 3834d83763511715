//! Execution context propagated through every engine call.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId, StepCategory, StepType};

/// Setup abstraction key for the account.
pub const ACCOUNT_ID: &str = "accountId";
/// Setup abstraction key for the organization.
pub const ORG_ID: &str = "orgIdentifier";
/// Setup abstraction key for the project.
pub const PROJECT_ID: &str = "projectIdentifier";

/// Metadata describing why and how a plan execution was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Monotonic run number of the pipeline.
    #[serde(default)]
    pub run_sequence: u64,
    /// Identifier of the pipeline definition the plan was compiled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_identifier: Option<String>,
    /// What kind of trigger started the run (manual, webhook, cron).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    /// Who started the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// One entry of the level stack: a node execution currently in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Plan node the level belongs to.
    pub setup_id: PlanNodeId,
    /// Node execution the level belongs to.
    pub runtime_id: NodeExecutionId,
    /// User-facing identifier of the node.
    pub identifier: String,
    /// Step type of the node.
    pub step_type: StepType,
    /// Optional group (e.g. `STAGE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Number of earlier attempts of this node.
    #[serde(default)]
    pub retry_index: u32,
    /// When the level was entered.
    pub start_ts: Timestamp,
}

/// Execution context: tenant abstractions plus the path from the plan root
/// to the currently executing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambiance {
    /// Plan being executed.
    pub plan_id: PlanId,
    /// Plan execution this context belongs to.
    pub plan_execution_id: PlanExecutionId,
    /// Tenant/scope abstractions (account, org, project...).
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Run metadata.
    #[serde(default)]
    pub metadata: ExecutionMetadata,
    /// Level stack, root first.
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    /// Creates a root ambiance with an empty level stack.
    pub fn new(plan_id: PlanId, plan_execution_id: PlanExecutionId) -> Self {
        Self {
            plan_id,
            plan_execution_id,
            setup_abstractions: BTreeMap::new(),
            metadata: ExecutionMetadata::default(),
            levels: Vec::new(),
        }
    }

    /// Sets the setup abstractions.
    pub fn with_setup_abstractions(mut self, abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = abstractions;
        self
    }

    /// Sets the run metadata.
    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Clones the ambiance and pushes a level for a child node.
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut cloned = self.clone();
        cloned.levels.push(level);
        cloned
    }

    /// Clones the ambiance with the current level removed.
    ///
    /// Used when moving on to a sibling: the sibling's level replaces the
    /// finished one.
    pub fn clone_for_finish(&self) -> Self {
        let depth = self.levels.len().saturating_sub(1);
        self.truncated(depth)
    }

    /// Clones the ambiance keeping only the first `levels` levels.
    pub fn truncated(&self, levels: usize) -> Self {
        let mut cloned = self.clone();
        cloned.levels.truncate(levels);
        cloned
    }

    /// Returns the innermost level, if any.
    #[inline]
    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Returns the node execution of the innermost level.
    pub fn obtain_current_runtime_id(&self) -> Option<NodeExecutionId> {
        self.current_level().map(|level| level.runtime_id)
    }

    /// Returns the plan node of the innermost level.
    pub fn obtain_current_setup_id(&self) -> Option<PlanNodeId> {
        self.current_level().map(|level| level.setup_id)
    }

    /// Returns the node execution one level above the current one.
    pub fn obtain_parent_runtime_id(&self) -> Option<NodeExecutionId> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        self.levels.get(len - 2).map(|level| level.runtime_id)
    }

    /// Returns the nearest enclosing level with the given category.
    pub fn level_with_category(&self, category: StepCategory) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|level| level.step_type.category == category)
    }

    /// Returns whether the current level is a retry attempt.
    pub fn is_retry(&self) -> bool {
        self.current_level()
            .is_some_and(|level| level.retry_index > 0)
    }

    /// Returns the dot-joined identifiers of all levels.
    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .map(|level| level.identifier.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns a setup abstraction by key.
    pub fn abstraction(&self, key: &str) -> Option<&str> {
        self.setup_abstractions.get(key).map(String::as_str)
    }

    /// Returns the account id, if set.
    pub fn account_id(&self) -> Option<&str> {
        self.abstraction(ACCOUNT_ID)
    }

    /// Returns the organization id, if set.
    pub fn org_id(&self) -> Option<&str> {
        self.abstraction(ORG_ID)
    }

    /// Returns the project id, if set.
    pub fn project_id(&self) -> Option<&str> {
        self.abstraction(PROJECT_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(identifier: &str, category: StepCategory) -> Level {
        Level {
            setup_id: PlanNodeId::new(),
            runtime_id: NodeExecutionId::new(),
            identifier: identifier.to_owned(),
            step_type: StepType::new(identifier.to_uppercase()).with_category(category),
            group: None,
            retry_index: 0,
            start_ts: Timestamp::now(),
        }
    }

    fn ambiance() -> Ambiance {
        let abstractions = BTreeMap::from([
            (ACCOUNT_ID.to_owned(), "acc".to_owned()),
            (PROJECT_ID.to_owned(), "proj".to_owned()),
        ]);
        Ambiance::new(PlanId::new(), PlanExecutionId::new())
            .with_setup_abstractions(abstractions)
            .clone_for_child(level("pipeline", StepCategory::Pipeline))
            .clone_for_child(level("build", StepCategory::Stage))
            .clone_for_child(level("compile", StepCategory::Step))
    }

    #[test]
    fn clone_for_child_pushes_level() {
        let root = ambiance();
        let child = root.clone_for_child(level("http", StepCategory::Step));
        assert_eq!(child.levels.len(), 4);
        assert_eq!(root.levels.len(), 3);
        assert_eq!(child.plan_execution_id, root.plan_execution_id);
    }

    #[test]
    fn clone_for_finish_pops_level() {
        let ambiance = ambiance();
        let finished = ambiance.clone_for_finish();
        assert_eq!(finished.levels.len(), 2);
        assert_eq!(finished.plan_id, ambiance.plan_id);
        assert_eq!(Ambiance::new(PlanId::new(), PlanExecutionId::new()).clone_for_finish().levels.len(), 0);
    }

    #[test]
    fn truncated_keeps_prefix() {
        let ambiance = ambiance();
        assert_eq!(ambiance.truncated(0).levels.len(), 0);
        assert_eq!(ambiance.truncated(1).levels.len(), 1);
        assert_eq!(ambiance.truncated(5).levels.len(), 3);
    }

    #[test]
    fn runtime_ids() {
        let ambiance = ambiance();
        assert_eq!(
            ambiance.obtain_current_runtime_id(),
            Some(ambiance.levels[2].runtime_id)
        );
        assert_eq!(
            ambiance.obtain_parent_runtime_id(),
            Some(ambiance.levels[1].runtime_id)
        );
        assert_eq!(ambiance.truncated(1).obtain_parent_runtime_id(), None);
    }

    #[test]
    fn property_getters() {
        let ambiance = ambiance();
        assert_eq!(ambiance.account_id(), Some("acc"));
        assert_eq!(ambiance.project_id(), Some("proj"));
        assert_eq!(ambiance.org_id(), None);
        assert_eq!(ambiance.fqn(), "pipeline.build.compile");
        assert_eq!(
            ambiance
                .level_with_category(StepCategory::Stage)
                .map(|l| l.identifier.as_str()),
            Some("build")
        );
        assert!(!ambiance.is_retry());
    }
}

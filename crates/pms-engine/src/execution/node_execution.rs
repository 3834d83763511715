//! Node execution record and partial updates.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::advise::AdviserResponse;
use crate::plan::PlanNode;
use crate::types::{
    Ambiance, CorrelationId, ExecutableResponse, ExecutionMode, FailureInfo, NodeExecutionId,
    PlanExecutionId, Status, StepResponse,
};

/// Progress reported by a running step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// When the update was received.
    pub ts: Timestamp,
    /// Opaque progress payload.
    pub data: Value,
}

/// Named block of step details (logs link, rendered summary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetails {
    /// Name of the details block.
    pub name: String,
    /// Opaque details payload.
    pub data: Value,
}

/// One attempt at executing a plan node within a plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Unique attempt id.
    pub id: NodeExecutionId,
    /// Plan execution the attempt belongs to.
    pub plan_execution_id: PlanExecutionId,
    /// Node being executed.
    pub node: PlanNode,
    /// Current status.
    pub status: Status,
    /// Context at the time of this attempt; its last level is this attempt.
    pub ambiance: Ambiance,
    /// Sibling that ran before this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<NodeExecutionId>,
    /// Parent that spawned this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeExecutionId>,
    /// Sibling triggered after this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<NodeExecutionId>,
    /// Correlation id the parent waits on for this chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_id: Option<CorrelationId>,
    /// Earlier attempts this one supersedes.
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,
    /// Whether a later attempt superseded this one.
    #[serde(default)]
    pub old_retry: bool,
    /// Execution mode chosen by facilitation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    /// What execution handed back to the engine.
    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,
    /// Failure details when broken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Named outputs produced by the step.
    #[serde(default)]
    pub outcomes: BTreeMap<String, Value>,
    /// Progress updates, oldest first.
    #[serde(default)]
    pub progress: Vec<ProgressUpdate>,
    /// Step details blocks.
    #[serde(default)]
    pub step_details: Vec<StepDetails>,
    /// Adviser decision applied to this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    /// When the attempt was created.
    pub start_ts: Timestamp,
    /// When the attempt reached a final status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<Timestamp>,
    /// Bumped on every write.
    #[serde(default)]
    pub version: u64,
}

impl NodeExecution {
    /// Creates a queued attempt.
    pub fn new(
        id: NodeExecutionId,
        plan_execution_id: PlanExecutionId,
        node: PlanNode,
        ambiance: Ambiance,
    ) -> Self {
        Self {
            id,
            plan_execution_id,
            node,
            status: Status::Queued,
            ambiance,
            previous_id: None,
            parent_id: None,
            next_id: None,
            notify_id: None,
            retry_ids: Vec::new(),
            old_retry: false,
            mode: None,
            executable_responses: Vec::new(),
            failure_info: None,
            outcomes: BTreeMap::new(),
            progress: Vec::new(),
            step_details: Vec::new(),
            adviser_response: None,
            start_ts: Timestamp::now(),
            end_ts: None,
            version: 0,
        }
    }

    /// Returns whether the attempt has reached a final status.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Returns whether the attempt has no children of its own.
    ///
    /// Parents (`CHILD`/`CHILDREN` modes) derive their status from children.
    pub fn is_leaf(&self) -> bool {
        !matches!(
            self.mode,
            Some(ExecutionMode::Child) | Some(ExecutionMode::Children)
        )
    }

    /// Returns a [`StepResponse`] describing the attempt's current state.
    pub fn step_response(&self) -> StepResponse {
        StepResponse {
            status: self.status,
            failure_info: self.failure_info.clone(),
            outcomes: self.outcomes.clone(),
        }
    }
}

/// Partial update of a node execution; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateNodeExecution {
    /// New status.
    pub status: Option<Status>,
    /// New execution mode.
    pub mode: Option<ExecutionMode>,
    /// Executable response to append.
    pub executable_response: Option<ExecutableResponse>,
    /// Failure details.
    pub failure_info: Option<FailureInfo>,
    /// Outcomes to merge.
    pub outcomes: Option<BTreeMap<String, Value>>,
    /// Progress update to append.
    pub progress: Option<ProgressUpdate>,
    /// Step details to append.
    pub step_details: Option<StepDetails>,
    /// Adviser decision.
    pub adviser_response: Option<AdviserResponse>,
    /// Next sibling.
    pub next_id: Option<NodeExecutionId>,
    /// Superseded flag.
    pub old_retry: Option<bool>,
    /// Final timestamp.
    pub end_ts: Option<Timestamp>,
}

impl UpdateNodeExecution {
    /// An update that only changes the status.
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// An update that finalizes the attempt with a step response.
    pub fn finish(response: &StepResponse) -> Self {
        Self {
            status: Some(response.status),
            failure_info: response.failure_info.clone(),
            outcomes: (!response.outcomes.is_empty()).then(|| response.outcomes.clone()),
            end_ts: response.status.is_final().then(Timestamp::now),
            ..Self::default()
        }
    }

    /// Applies the update to a record, bumping its version.
    pub fn apply(self, record: &mut NodeExecution) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(mode) = self.mode {
            record.mode = Some(mode);
        }
        if let Some(response) = self.executable_response {
            record.executable_responses.push(response);
        }
        if let Some(failure_info) = self.failure_info {
            record.failure_info = Some(failure_info);
        }
        if let Some(outcomes) = self.outcomes {
            record.outcomes.extend(outcomes);
        }
        if let Some(progress) = self.progress {
            record.progress.push(progress);
        }
        if let Some(details) = self.step_details {
            record.step_details.push(details);
        }
        if let Some(adviser_response) = self.adviser_response {
            record.adviser_response = Some(adviser_response);
        }
        if let Some(next_id) = self.next_id {
            record.next_id = Some(next_id);
        }
        if let Some(old_retry) = self.old_retry {
            record.old_retry = old_retry;
        }
        if let Some(end_ts) = self.end_ts {
            record.end_ts.get_or_insert(end_ts);
        }
        record.version += 1;
    }
}

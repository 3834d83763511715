//! Step-facing protocol types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::{CorrelationId, PlanNodeId, Status};
use crate::error::{Error, ErrorKind};

/// Discriminates which step implementation handles a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepType {
    /// Registered step type name, e.g. `"HTTP"`.
    #[serde(rename = "type")]
    pub name: String,
    /// Structural category of the step.
    #[serde(default)]
    pub category: StepCategory,
}

impl StepType {
    /// Creates a step type in the [`StepCategory::Step`] category.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: StepCategory::Step,
        }
    }

    /// Sets the category.
    pub fn with_category(mut self, category: StepCategory) -> Self {
        self.category = category;
        self
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

/// Structural category of a step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    /// Root of a plan.
    Pipeline,
    /// Top-level unit of a pipeline.
    Stage,
    /// Group of steps sharing configuration.
    StepGroup,
    /// Looping or matrix fan-out.
    Strategy,
    /// Parallel fork.
    Fork,
    /// Leaf step.
    #[default]
    Step,
}

/// How a node executes, as decided by facilitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// The step returns its response inline.
    Sync,
    /// The step dispatches work and returns callback ids to wait on.
    Async,
    /// The step produces a delegate task that the engine queues.
    Task,
    /// The step spawns exactly one child node.
    Child,
    /// The step fans out into several child nodes.
    Children,
}

/// Broad classification of a failure, used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    /// The step's own logic failed.
    Application,
    /// A remote endpoint could not be reached.
    Connectivity,
    /// Credentials were rejected.
    Authentication,
    /// The caller lacks permission.
    Authorization,
    /// The work did not finish in time.
    Timeout,
    /// Output verification failed.
    Verification,
    /// Anything else.
    Unknown,
}

impl From<ErrorKind> for FailureType {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => FailureType::Timeout,
            ErrorKind::Step => FailureType::Application,
            ErrorKind::Serialization => FailureType::Verification,
            _ => FailureType::Unknown,
        }
    }
}

/// Details attached to a failed or errored node execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Human readable failure message.
    pub message: String,
    /// Classification of the failure.
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
}

impl FailureInfo {
    /// Creates failure info with a message and no classification.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_types: Vec::new(),
        }
    }

    /// Adds a failure type.
    pub fn with_type(mut self, failure_type: FailureType) -> Self {
        if !self.failure_types.contains(&failure_type) {
            self.failure_types.push(failure_type);
        }
        self
    }

    /// Returns whether the failure carries the given classification.
    pub fn has_type(&self, failure_type: FailureType) -> bool {
        self.failure_types.contains(&failure_type)
    }
}

impl From<&Error> for FailureInfo {
    fn from(error: &Error) -> Self {
        Self::new(error.to_string()).with_type(error.kind().into())
    }
}

/// Terminal-for-this-attempt response produced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Status the attempt finished with.
    pub status: Status,
    /// Failure details when the status is broken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Named outputs other nodes can reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outcomes: BTreeMap<String, Value>,
}

impl StepResponse {
    /// A successful response without outcomes.
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    /// A failed response carrying the failure details.
    pub fn failed(failure_info: FailureInfo) -> Self {
        Self::with_failure(Status::Failed, failure_info)
    }

    /// An errored response carrying the failure details.
    pub fn errored(failure_info: FailureInfo) -> Self {
        Self::with_failure(Status::Errored, failure_info)
    }

    /// A response for a node that was skipped.
    pub fn skipped() -> Self {
        Self {
            status: Status::Skipped,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    /// A response with an explicit status.
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    fn with_failure(status: Status, failure_info: FailureInfo) -> Self {
        Self {
            status,
            failure_info: Some(failure_info),
            outcomes: BTreeMap::new(),
        }
    }

    /// Attaches failure details.
    pub fn with_failure_info(mut self, failure_info: FailureInfo) -> Self {
        self.failure_info = Some(failure_info);
        self
    }

    /// Adds a named outcome.
    pub fn with_outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.insert(name.into(), value);
        self
    }

    /// Builds the response the engine synthesizes for a failed unit of work.
    ///
    /// Invariant violations become `ERRORED`; every other error is a
    /// `FAILED` response so the advise layer treats it like a business
    /// failure.
    pub fn from_error(error: &Error) -> Self {
        let info = FailureInfo::from(error);
        if error.is_invariant_violation() {
            Self::errored(info)
        } else {
            Self::failed(info)
        }
    }
}

/// Record of what a node's execution handed back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableResponse {
    /// Sync execution, nothing to wait on.
    Sync,
    /// Async execution waiting on callback ids.
    Async {
        /// Ids the node waits on.
        callback_ids: Vec<CorrelationId>,
        /// Optional timeout in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Delegate task queued.
    Task {
        /// Id returned by the task queue.
        task_id: CorrelationId,
    },
    /// Single child spawned.
    Child {
        /// Plan node of the child.
        child_node_id: PlanNodeId,
    },
    /// Several children spawned.
    Children {
        /// Plan nodes of the children.
        children: Vec<PlanNodeId>,
    },
    /// Chain link suspended until callbacks arrive.
    SuspendedChain {
        /// Ids the chain waits on.
        callback_ids: Vec<CorrelationId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_responses_follow_error_taxonomy() {
        let transport = StepResponse::from_error(&Error::timeout().with_message("delegate"));
        assert_eq!(transport.status, Status::Failed);
        assert!(transport.failure_info.unwrap().has_type(FailureType::Timeout));

        let invariant = StepResponse::from_error(&Error::configuration());
        assert_eq!(invariant.status, Status::Errored);
    }

    #[test]
    fn executable_response_is_tagged() {
        let value = serde_json::to_value(ExecutableResponse::Task {
            task_id: CorrelationId::from("t-1"),
        })
        .unwrap();
        assert_eq!(value["mode"], "TASK");
        assert_eq!(value["task_id"], "t-1");
    }

    #[test]
    fn step_type_display() {
        let step_type = StepType::new("HTTP").with_category(StepCategory::Stage);
        assert_eq!(step_type.to_string(), "STAGE:HTTP");
    }
}

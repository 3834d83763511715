//! Continuation records and response envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::advise::AdviserResponse;
use crate::facilitate::FacilitatorResponse;
use crate::types::{CorrelationId, FailureInfo, NodeExecutionId, Status};

/// Which phase a woken node continues with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WakePhase {
    /// Start the node from facilitation (retry waits).
    Start,
    /// Execute the node in its already chosen mode (initial waits).
    Execute,
}

/// What the engine does once a wait fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Continuation {
    /// Resume a node parked on async work, a delegate task or children.
    Resume {
        /// Parked node.
        node_execution_id: NodeExecutionId,
    },
    /// Apply a deferred adviser's answer.
    AdviseResume {
        /// Node being advised.
        node_execution_id: NodeExecutionId,
    },
    /// Apply a deferred facilitator's answer.
    FacilitateResume {
        /// Node being facilitated.
        node_execution_id: NodeExecutionId,
    },
    /// Continue a node after a timed wait.
    Wake {
        /// Sleeping node.
        node_execution_id: NodeExecutionId,
        /// Phase to continue with.
        phase: WakePhase,
    },
}

impl Continuation {
    /// Returns the node execution the continuation belongs to.
    pub fn node_execution_id(&self) -> NodeExecutionId {
        match self {
            Self::Resume { node_execution_id }
            | Self::AdviseResume { node_execution_id }
            | Self::FacilitateResume { node_execution_id }
            | Self::Wake {
                node_execution_id, ..
            } => *node_execution_id,
        }
    }
}

/// Payload a child chain sends to its parent when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNotify {
    /// Last node execution of the chain.
    pub node_execution_id: NodeExecutionId,
    /// Its final status.
    pub status: Status,
}

/// Response delivered for a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    /// Opaque result of async work or a delegate task.
    Payload(Value),
    /// A child chain finished.
    StepNotify(StepNotify),
    /// A deferred facilitator's answer.
    Facilitator(FacilitatorResponse),
    /// A deferred adviser's answer.
    Adviser(AdviserResponse),
    /// The work failed.
    Failure(FailureInfo),
}

impl ResponseData {
    /// Returns the failure details if this is a failure.
    pub fn as_failure(&self) -> Option<&FailureInfo> {
        match self {
            Self::Failure(info) => Some(info),
            _ => None,
        }
    }
}

/// A fired wait, handed to the engine's dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// What to do.
    pub continuation: Continuation,
    /// Every response collected for the wait, by correlation id.
    pub responses: BTreeMap<CorrelationId, ResponseData>,
    /// Whether the wait fired through the error channel.
    pub is_error: bool,
}

impl Notification {
    /// Returns the first failure among the responses.
    pub fn failure(&self) -> Option<&FailureInfo> {
        self.responses.values().find_map(ResponseData::as_failure)
    }
}

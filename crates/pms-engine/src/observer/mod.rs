//! Lifecycle observers.
//!
//! Collaborators such as log streaming or audit register observers on the
//! engine's [`Subject`]s to be told when a plan execution starts or ends and
//! when a node execution changes status.

mod subject;

pub use self::subject::{Observer, Subject};
use crate::types::{Ambiance, ExecutionMetadata, NodeExecutionId, Status};

/// Information handed to start observers.
#[derive(Debug, Clone)]
pub struct OrchestrationStartInfo {
    /// Root context of the plan execution.
    pub ambiance: Ambiance,
    /// Trigger metadata.
    pub metadata: ExecutionMetadata,
}

/// Information handed to node status observers.
#[derive(Debug, Clone)]
pub struct NodeUpdateInfo {
    /// Node execution that changed.
    pub node_execution_id: NodeExecutionId,
    /// Its context.
    pub ambiance: Ambiance,
    /// New status.
    pub status: Status,
}

/// Told before the first node of a plan execution runs.
pub trait OrchestrationStartObserver: Observer {
    /// Called once per plan execution.
    fn on_start(&self, info: &OrchestrationStartInfo);
}

/// Told once a plan execution has its final status.
pub trait OrchestrationEndObserver: Observer {
    /// Called once per plan execution.
    fn on_end(&self, ambiance: &Ambiance, status: Status);
}

/// Told after every accepted node execution status write.
pub trait NodeStatusUpdateObserver: Observer {
    /// Called for each accepted write.
    fn on_node_status_update(&self, info: &NodeUpdateInfo);
}

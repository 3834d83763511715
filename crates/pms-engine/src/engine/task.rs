//! Units of work submitted to the worker pool.

use crate::advise::AdviserResponse;
use crate::facilitate::FacilitatorResponse;
use crate::notify::Notification;
use crate::step::TaskRequest;
use crate::types::{ExecutionMode, NodeExecutionId, PlanNodeId, StepResponse};

/// A transition the engine runs on its own task.
///
/// Every hop from one node (or one phase) to the next goes through an
/// `EngineTask`, so no transition runs on the caller's stack.
#[derive(Debug, Clone)]
pub(crate) enum EngineTask {
    /// Facilitate and execute a queued attempt.
    Start(NodeExecutionId),
    /// Continue after a fired wait.
    Notify(Notification),
    /// Complete an attempt and advise it.
    StepResponse(NodeExecutionId, StepResponse),
    /// Apply a facilitation decision.
    Facilitated(NodeExecutionId, FacilitatorResponse),
    /// Apply an advise decision.
    Advised(NodeExecutionId, AdviserResponse),
    /// Queue a delegate task.
    QueueTask(NodeExecutionId, TaskRequest),
    /// Fan out into children.
    SpawnChildren {
        node_execution_id: NodeExecutionId,
        mode: ExecutionMode,
        children: Vec<PlanNodeId>,
    },
    /// Expire an attempt whose wait timed out.
    Expire(NodeExecutionId),
}

impl EngineTask {
    /// Returns the node execution the task is about.
    pub(crate) fn node_execution_id(&self) -> NodeExecutionId {
        match self {
            Self::Start(id)
            | Self::StepResponse(id, _)
            | Self::Facilitated(id, _)
            | Self::Advised(id, _)
            | Self::QueueTask(id, _)
            | Self::Expire(id)
            | Self::SpawnChildren {
                node_execution_id: id,
                ..
            } => *id,
            Self::Notify(notification) => notification.continuation.node_execution_id(),
        }
    }

    /// Returns a short name for logs.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Notify(_) => "notify",
            Self::StepResponse(..) => "step_response",
            Self::Facilitated(..) => "facilitated",
            Self::Advised(..) => "advised",
            Self::QueueTask(..) => "queue_task",
            Self::SpawnChildren { .. } => "spawn_children",
            Self::Expire(_) => "expire",
        }
    }
}

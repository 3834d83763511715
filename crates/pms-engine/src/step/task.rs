//! Delegate task boundary.
//!
//! How a task physically reaches a remote worker is not the engine's
//! concern: the engine queues a [`DelegateTask`] through a [`TaskQueue`] and
//! waits on its `task_id`. Whoever runs the task reports back through
//! [`NotifyEngine::deliver`](crate::notify::NotifyEngine::deliver).

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::{Ambiance, CorrelationId, NodeExecutionId};

/// Task description produced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Kind of task, interpreted by the worker.
    pub task_type: String,
    /// Task input.
    #[serde(default)]
    pub payload: Value,
    /// Expire the node if the task has not answered in time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskRequest {
    /// Creates a request.
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            timeout_ms: None,
        }
    }

    /// Sets the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A task queued on behalf of a node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    /// Correlation id the result must be delivered under.
    pub task_id: CorrelationId,
    /// Node execution waiting on the task.
    pub node_execution_id: NodeExecutionId,
    /// Context of that node execution.
    pub ambiance: Ambiance,
    /// What to run.
    pub request: TaskRequest,
    /// When the task was queued.
    pub queued_at: Timestamp,
}

/// Hands delegate tasks to whatever runs them.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queues a task. The engine has already registered its wait.
    async fn queue_task(&self, task: DelegateTask) -> Result<()>;
}

/// [`TaskQueue`] backed by an unbounded in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelTaskQueue {
    sender: mpsc::UnboundedSender<DelegateTask>,
}

impl ChannelTaskQueue {
    /// Creates the queue and the receiving end workers drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DelegateTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn queue_task(&self, task: DelegateTask) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|_| Error::internal().with_message("task queue closed"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{PlanExecutionId, PlanId};

    #[tokio::test]
    async fn queued_tasks_reach_the_receiver() {
        let (queue, mut receiver) = ChannelTaskQueue::new();
        let task = DelegateTask {
            task_id: CorrelationId::generate(),
            node_execution_id: NodeExecutionId::new(),
            ambiance: Ambiance::new(PlanId::new(), PlanExecutionId::new()),
            request: TaskRequest::new("SHELL", json!({"script": "echo hi"})),
            queued_at: Timestamp::now(),
        };
        queue.queue_task(task.clone()).await.unwrap();
        assert_eq!(receiver.recv().await, Some(task));

        drop(receiver);
        let closed = queue
            .queue_task(DelegateTask {
                task_id: CorrelationId::generate(),
                node_execution_id: NodeExecutionId::new(),
                ambiance: Ambiance::new(PlanId::new(), PlanExecutionId::new()),
                request: TaskRequest::new("SHELL", Value::Null),
                queued_at: Timestamp::now(),
            })
            .await;
        assert_eq!(closed.unwrap_err().kind(), crate::ErrorKind::Internal);
    }
}

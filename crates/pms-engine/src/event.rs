//! Orchestration lifecycle events.

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::broadcast;

use crate::TRACING_TARGET_ENGINE;
use crate::error::Result;
use crate::types::{Ambiance, Status};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    /// A plan execution started.
    OrchestrationStart,
    /// A plan execution reached its final status.
    OrchestrationEnd,
}

/// Lifecycle event consumed by telemetry and audit collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// Event kind.
    pub event_type: OrchestrationEventType,
    /// Root context of the plan execution.
    pub ambiance: Ambiance,
    /// Plan execution status at emission time.
    pub status: Status,
    /// When the event was emitted.
    pub emitted_at: Timestamp,
}

impl OrchestrationEvent {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: OrchestrationEventType, ambiance: Ambiance, status: Status) -> Self {
        Self {
            event_type,
            ambiance,
            status,
            emitted_at: Timestamp::now(),
        }
    }
}

/// Sink for lifecycle events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: OrchestrationEvent) -> Result<()>;
}

/// [`EventEmitter`] over a tokio broadcast channel.
///
/// Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastEventEmitter {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl BroadcastEventEmitter {
    /// Creates an emitter buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventEmitter for BroadcastEventEmitter {
    async fn emit(&self, event: OrchestrationEvent) -> Result<()> {
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            event_type = %event.event_type,
            plan_execution_id = %event.ambiance.plan_execution_id,
            status = %event.status,
            "emitting orchestration event"
        );
        // A send error only means nobody is subscribed.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanExecutionId, PlanId};

    #[tokio::test]
    async fn subscribers_receive_events() {
        let emitter = BroadcastEventEmitter::default();
        let ambiance = Ambiance::new(PlanId::new(), PlanExecutionId::new());

        emitter
            .emit(OrchestrationEvent::new(
                OrchestrationEventType::OrchestrationStart,
                ambiance.clone(),
                Status::Running,
            ))
            .await
            .unwrap();

        let mut receiver = emitter.subscribe();
        emitter
            .emit(OrchestrationEvent::new(
                OrchestrationEventType::OrchestrationEnd,
                ambiance.clone(),
                Status::Succeeded,
            ))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, OrchestrationEventType::OrchestrationEnd);
        assert_eq!(event.status, Status::Succeeded);
        assert_eq!(event.ambiance.plan_execution_id, ambiance.plan_execution_id);
    }
}

//! SDK response envelope and typed payloads.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};

use crate::advise::AdviserResponse;
use crate::error::{Error, Result};
use crate::facilitate::FacilitatorResponse;
use crate::notify::ResponseData;
use crate::step::TaskRequest;
use crate::types::{
    Ambiance, CorrelationId, ExecutableResponse, FailureInfo, NodeExecutionId, PlanNodeId, Status,
    StepResponse,
};

/// Kind of response a step or an out-of-process SDK sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SdkResponseEventType {
    /// Records an executable response, optionally with a status.
    AddExecutableResponse,
    /// Completes an attempt with a step response.
    HandleStepResponse,
    /// Resumes a parked node with its responses.
    ResumeNodeExecution,
    /// Answers facilitation.
    HandleFacilitateResponse,
    /// Fails whatever waits on a correlation id.
    HandleEventError,
    /// Answers advising.
    HandleAdviserResponse,
    /// Queues a delegate task for a node.
    QueueTask,
    /// Parks a node until callbacks arrive.
    SuspendChain,
    /// Spawns a single child.
    SpawnChild,
    /// Spawns several children.
    SpawnChildren,
    /// Appends a progress update.
    HandleProgress,
    /// Appends step details.
    #[serde(rename = "ADD_STEP_DETAILS_INSTANCE_REQUEST")]
    #[strum(serialize = "ADD_STEP_DETAILS_INSTANCE_REQUEST")]
    AddStepDetailsInstance,
}

/// A response event as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkResponseEvent {
    /// Selects the handler.
    pub event_type: SdkResponseEventType,
    /// Context of the node the event is about.
    pub ambiance: Ambiance,
    /// Event-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl SdkResponseEvent {
    /// Builds an event from a typed payload.
    pub fn new<P: Serialize>(event_type: SdkResponseEventType, ambiance: Ambiance, payload: &P) -> Result<Self> {
        Ok(Self {
            event_type,
            ambiance,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decodes the payload.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P> {
        serde_json::from_value(self.payload.clone()).map_err(|error| {
            Error::serialization()
                .with_message(format!("invalid {} payload", self.event_type))
                .with_source(error)
        })
    }
}

/// Payload of [`SdkResponseEventType::AddExecutableResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddExecutableResponseRequest {
    pub node_execution_id: NodeExecutionId,
    pub executable_response: ExecutableResponse,
    /// Status to move the node to, written only from a flowing status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Payload of [`SdkResponseEventType::HandleStepResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleStepResponseRequest {
    pub node_execution_id: NodeExecutionId,
    pub step_response: StepResponse,
}

/// Payload of [`SdkResponseEventType::ResumeNodeExecution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeNodeExecutionRequest {
    pub node_execution_id: NodeExecutionId,
    #[serde(default)]
    pub responses: BTreeMap<CorrelationId, ResponseData>,
    #[serde(default)]
    pub is_error: bool,
}

/// Payload of [`SdkResponseEventType::HandleFacilitateResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleFacilitateResponseRequest {
    pub node_execution_id: NodeExecutionId,
    pub facilitator_response: FacilitatorResponse,
}

/// Payload of [`SdkResponseEventType::HandleEventError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleEventErrorRequest {
    pub correlation_id: CorrelationId,
    pub failure_info: FailureInfo,
}

/// Payload of [`SdkResponseEventType::HandleAdviserResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleAdviserResponseRequest {
    pub node_execution_id: NodeExecutionId,
    pub adviser_response: AdviserResponse,
}

/// Payload of [`SdkResponseEventType::QueueTask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTaskRequest {
    pub node_execution_id: NodeExecutionId,
    pub task_request: TaskRequest,
}

/// Payload of [`SdkResponseEventType::SuspendChain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendChainRequest {
    pub node_execution_id: NodeExecutionId,
    pub callback_ids: Vec<CorrelationId>,
}

/// Payload of [`SdkResponseEventType::SpawnChild`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnChildRequest {
    pub node_execution_id: NodeExecutionId,
    pub child_node_id: PlanNodeId,
}

/// Payload of [`SdkResponseEventType::SpawnChildren`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnChildrenRequest {
    pub node_execution_id: NodeExecutionId,
    pub children: Vec<PlanNodeId>,
}

/// Payload of [`SdkResponseEventType::HandleProgress`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleProgressRequest {
    pub node_execution_id: NodeExecutionId,
    pub progress: Value,
}

/// Payload of [`SdkResponseEventType::AddStepDetailsInstance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddStepDetailsInstanceRequest {
    pub node_execution_id: NodeExecutionId,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::types::{PlanExecutionId, PlanId};

    #[test]
    fn twelve_event_types() {
        assert_eq!(SdkResponseEventType::iter().count(), 12);
        assert_eq!(
            SdkResponseEventType::AddStepDetailsInstance.to_string(),
            "ADD_STEP_DETAILS_INSTANCE_REQUEST"
        );
        assert_eq!(
            serde_json::to_value(SdkResponseEventType::AddStepDetailsInstance).unwrap(),
            json!("ADD_STEP_DETAILS_INSTANCE_REQUEST")
        );
    }

    #[test]
    fn unknown_event_type_fails_to_decode() {
        let ambiance = serde_json::to_value(Ambiance::new(PlanId::new(), PlanExecutionId::new())).unwrap();
        let err = serde_json::from_value::<SdkResponseEvent>(json!({
            "event_type": "REWIND_TIME",
            "ambiance": ambiance,
            "payload": {},
        }))
        .unwrap_err();
        assert_eq!(Error::from(err).kind(), crate::ErrorKind::Serialization);
    }

    #[test]
    fn typed_payloads() {
        let id = NodeExecutionId::new();
        let event = SdkResponseEvent::new(
            SdkResponseEventType::HandleProgress,
            Ambiance::new(PlanId::new(), PlanExecutionId::new()),
            &HandleProgressRequest {
                node_execution_id: id,
                progress: json!({"percent": 40}),
            },
        )
        .unwrap();
        let request: HandleProgressRequest = event.decode().unwrap();
        assert_eq!(request.node_execution_id, id);

        let err = event.decode::<SpawnChildRequest>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Serialization);
    }
}

//! Core protocol types shared by every engine component.
//!
//! - [`Status`]: lifecycle status of plan and node executions
//! - [`Ambiance`]: propagated execution context and level stack
//! - [`StepResponse`], [`FailureInfo`], [`ExecutionMode`]: step protocol
//! - identifier newtypes ([`PlanId`], [`PlanNodeId`], [`PlanExecutionId`],
//!   [`NodeExecutionId`], [`CorrelationId`])

mod ambiance;
mod id;
mod status;
mod step;

pub use ambiance::{ACCOUNT_ID, Ambiance, ExecutionMetadata, Level, ORG_ID, PROJECT_ID};
pub use id::{CorrelationId, NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId};
pub use status::Status;
pub use step::{
    ExecutableResponse, ExecutionMode, FailureInfo, FailureType, StepCategory, StepResponse,
    StepType,
};

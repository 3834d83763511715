//! SDK response routing.
//!
//! Steps running out of process report back through [`SdkResponseEvent`]s.
//! The [`SdkResponseRouter`] decodes each event's typed payload and applies
//! it to the engine.

mod event;
mod handler;
mod router;

pub use self::event::{
    AddExecutableResponseRequest, AddStepDetailsInstanceRequest, HandleAdviserResponseRequest,
    HandleEventErrorRequest, HandleFacilitateResponseRequest, HandleProgressRequest,
    HandleStepResponseRequest, QueueTaskRequest, ResumeNodeExecutionRequest, SdkResponseEvent,
    SdkResponseEventType, SpawnChildRequest, SpawnChildrenRequest, SuspendChainRequest,
};
pub use self::handler::{
    AddExecutableResponseHandler, AddStepDetailsInstanceHandler, HandleAdviserResponseHandler,
    HandleEventErrorHandler, HandleFacilitateResponseHandler, HandleProgressHandler,
    HandleStepResponseHandler, QueueTaskHandler, ResumeNodeExecutionHandler, SdkResponseHandler,
    SpawnChildHandler, SpawnChildrenHandler, SuspendChainHandler,
};
pub use self::router::{SdkResponseRouter, SdkResponseRouterBuilder};

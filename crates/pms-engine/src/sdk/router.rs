//! Event type to handler routing.

use std::collections::HashMap;
use std::sync::Arc;

use strum::IntoEnumIterator;

use super::event::{SdkResponseEvent, SdkResponseEventType};
use super::handler::{
    AddExecutableResponseHandler, AddStepDetailsInstanceHandler, HandleAdviserResponseHandler,
    HandleEventErrorHandler, HandleFacilitateResponseHandler, HandleProgressHandler,
    HandleStepResponseHandler, QueueTaskHandler, ResumeNodeExecutionHandler, SdkResponseHandler,
    SpawnChildHandler, SpawnChildrenHandler, SuspendChainHandler,
};
use crate::TRACING_TARGET_SDK;
use crate::engine::OrchestrationEngine;
use crate::error::{Error, Result};

/// Routes SDK response events to their handlers.
///
/// The handler table is fixed once built and covers every
/// [`SdkResponseEventType`].
#[derive(Clone)]
pub struct SdkResponseRouter {
    handlers: HashMap<SdkResponseEventType, Arc<dyn SdkResponseHandler>>,
}

impl std::fmt::Debug for SdkResponseRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl SdkResponseRouter {
    /// Starts an empty router.
    pub fn builder() -> SdkResponseRouterBuilder {
        SdkResponseRouterBuilder::default()
    }

    /// Builds the router with the engine's own handlers.
    pub fn with_defaults() -> Self {
        Self {
            handlers: default_handlers(),
        }
    }

    /// Hands an event to its handler.
    pub async fn dispatch(&self, engine: &OrchestrationEngine, event: SdkResponseEvent) -> Result<()> {
        let event_type = event.event_type;
        let handler = self.handlers.get(&event_type).ok_or_else(|| {
            Error::configuration().with_message(format!("no handler for {event_type}"))
        })?;

        tracing::debug!(
            target: TRACING_TARGET_SDK,
            event_type = %event_type,
            plan_execution_id = %event.ambiance.plan_execution_id,
            "dispatching sdk response"
        );
        handler.handle(engine, event).await.inspect_err(|error| {
            tracing::warn!(
                target: TRACING_TARGET_SDK,
                event_type = %event_type,
                error = %error,
                "sdk response rejected"
            );
        })
    }
}

impl Default for SdkResponseRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_handlers() -> HashMap<SdkResponseEventType, Arc<dyn SdkResponseHandler>> {
    use SdkResponseEventType as T;

    SdkResponseEventType::iter()
        .map(|event_type| {
            let handler: Arc<dyn SdkResponseHandler> = match event_type {
                T::AddExecutableResponse => Arc::new(AddExecutableResponseHandler),
                T::HandleStepResponse => Arc::new(HandleStepResponseHandler),
                T::ResumeNodeExecution => Arc::new(ResumeNodeExecutionHandler),
                T::HandleFacilitateResponse => Arc::new(HandleFacilitateResponseHandler),
                T::HandleEventError => Arc::new(HandleEventErrorHandler),
                T::HandleAdviserResponse => Arc::new(HandleAdviserResponseHandler),
                T::QueueTask => Arc::new(QueueTaskHandler),
                T::SuspendChain => Arc::new(SuspendChainHandler),
                T::SpawnChild => Arc::new(SpawnChildHandler),
                T::SpawnChildren => Arc::new(SpawnChildrenHandler),
                T::HandleProgress => Arc::new(HandleProgressHandler),
                T::AddStepDetailsInstance => Arc::new(AddStepDetailsInstanceHandler),
            };
            (event_type, handler)
        })
        .collect()
}

/// Builder for a router with custom handlers.
#[derive(Default)]
pub struct SdkResponseRouterBuilder {
    handlers: HashMap<SdkResponseEventType, Arc<dyn SdkResponseHandler>>,
}

impl SdkResponseRouterBuilder {
    /// Starts from the engine's own handlers.
    pub fn with_defaults(mut self) -> Self {
        self.handlers.extend(default_handlers());
        self
    }

    /// Sets the handler for an event type, replacing any previous one.
    pub fn handler(
        mut self,
        event_type: SdkResponseEventType,
        handler: impl SdkResponseHandler + 'static,
    ) -> Self {
        self.handlers.insert(event_type, Arc::new(handler));
        self
    }

    /// Builds the router.
    ///
    /// Fails with a configuration error naming the first event type without
    /// a handler.
    pub fn build(self) -> Result<SdkResponseRouter> {
        if let Some(missing) = SdkResponseEventType::iter().find(|t| !self.handlers.contains_key(t)) {
            return Err(Error::configuration()
                .with_message(format!("no sdk response handler registered for {missing}")));
        }
        Ok(SdkResponseRouter {
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_has_a_default_handler() {
        let router = SdkResponseRouter::with_defaults();
        for event_type in SdkResponseEventType::iter() {
            assert!(router.handlers.contains_key(&event_type), "{event_type}");
        }
    }

    #[test]
    fn incomplete_router_fails_to_build() {
        let err = SdkResponseRouter::builder()
            .handler(SdkResponseEventType::HandleProgress, HandleProgressHandler)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);

        assert!(SdkResponseRouter::builder().with_defaults().build().is_ok());
    }
}

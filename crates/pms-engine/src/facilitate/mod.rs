//! Facilitation: deciding how a node executes.
//!
//! Before a node runs, the engine consults the facilitators named by the
//! node's obtainments, in order. The first [`FacilitatorOutcome::Decided`]
//! wins; a facilitator may also defer, in which case its answer arrives
//! later as a [`ResponseData::Facilitator`] delivery.
//!
//! [`ResponseData::Facilitator`]: crate::notify::ResponseData::Facilitator

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::builtin::ModeFacilitator;
use crate::error::{Error, Result};
use crate::plan::PlanNode;
use crate::types::{Ambiance, CorrelationId, ExecutionMode, NodeExecutionId};

/// Facilitator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorResponse {
    /// How the node executes.
    pub execution_mode: ExecutionMode,
    /// Delay before execution starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_wait_ms: Option<u64>,
}

impl FacilitatorResponse {
    /// A decision without initial wait.
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            initial_wait_ms: None,
        }
    }

    /// Sets the initial wait.
    pub fn with_initial_wait_ms(mut self, initial_wait_ms: u64) -> Self {
        self.initial_wait_ms = Some(initial_wait_ms).filter(|ms| *ms > 0);
        self
    }
}

/// What a single facilitator made of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacilitatorOutcome {
    /// A definitive decision.
    Decided(FacilitatorResponse),
    /// The decision arrives later under this correlation id.
    Deferred(CorrelationId),
    /// No opinion; ask the next facilitator.
    Pass,
}

/// Inputs available to a facilitator.
#[derive(Debug, Clone, Copy)]
pub struct FacilitateContext<'a> {
    /// Context of the node being facilitated.
    pub ambiance: &'a Ambiance,
    /// Node execution being facilitated.
    pub node_execution_id: NodeExecutionId,
    /// Node being facilitated.
    pub node: &'a PlanNode,
    /// Parameters of the obtainment that selected this facilitator.
    pub parameters: &'a Value,
}

/// Decides how a node executes.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Produces a decision, a deferral, or no opinion.
    async fn facilitate(&self, ctx: FacilitateContext<'_>) -> Result<FacilitatorOutcome>;
}

/// Facilitators by registered name.
#[derive(Clone, Default)]
pub struct FacilitatorRegistry {
    facilitators: HashMap<String, Arc<dyn Facilitator>>,
}

impl std::fmt::Debug for FacilitatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.facilitators.keys()).finish()
    }
}

impl FacilitatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding one [`ModeFacilitator`] per execution
    /// mode, registered under the mode's name (`"SYNC"`, `"ASYNC"`...).
    pub fn with_builtins() -> Self {
        [
            ExecutionMode::Sync,
            ExecutionMode::Async,
            ExecutionMode::Task,
            ExecutionMode::Child,
            ExecutionMode::Children,
        ]
        .into_iter()
        .fold(Self::new(), |registry, mode| {
            registry.register(mode.to_string(), ModeFacilitator::new(mode))
        })
    }

    /// Registers a facilitator under a name, replacing any previous one.
    pub fn register(mut self, name: impl Into<String>, facilitator: impl Facilitator + 'static) -> Self {
        self.facilitators.insert(name.into(), Arc::new(facilitator));
        self
    }

    /// Looks up a facilitator.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Facilitator>> {
        self.facilitators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration().with_message(format!("no facilitator registered as {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_mode() {
        let registry = FacilitatorRegistry::with_builtins();
        for name in ["SYNC", "ASYNC", "TASK", "CHILD", "CHILDREN"] {
            assert!(registry.get(name).is_ok(), "{name}");
        }
        let missing = registry.get("BARRIER").err().unwrap();
        assert_eq!(missing.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn zero_initial_wait_is_none() {
        let response = FacilitatorResponse::new(ExecutionMode::Sync).with_initial_wait_ms(0);
        assert_eq!(response.initial_wait_ms, None);
    }
}

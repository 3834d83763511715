//! Advise: deciding what happens after a node finishes an attempt.
//!
//! Advisers named by the node's obtainments are consulted in order; the
//! first one whose [`Adviser::can_advise`] returns `true` decides. When none
//! can, the node ends with the status it has.

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoStaticStr;

pub use self::builtin::{
    EndPlanAdviser, IgnoreFailureAdviser, ManualInterventionAdviser, MarkStatusAdviser,
    NextStepAdviser, RetryAdviser,
};
use crate::error::{Error, Result};
use crate::execution::NodeExecution;
use crate::types::{CorrelationId, PlanNodeId, Status};

/// Adviser decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// No opinion: end the node with its current status.
    Unknown,
    /// Trigger a sibling node.
    NextStep {
        /// Node to trigger.
        next_node_id: PlanNodeId,
    },
    /// Run the node again.
    Retry {
        /// Delay before the new attempt.
        #[serde(default)]
        wait_ms: u64,
        /// Replacement step parameters for the new attempt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_parameters: Option<Value>,
    },
    /// Override a broken status (mark success, mark failed).
    MarkStatus {
        /// Status to write.
        status: Status,
    },
    /// Turn the failure into `IGNORE_FAILED` and optionally move on.
    IgnoreFailure {
        /// Node to trigger afterwards.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<PlanNodeId>,
    },
    /// End the whole plan execution.
    EndPlan,
}

impl AdviserResponse {
    /// Returns the `SCREAMING_SNAKE_CASE` name of the response type.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// What a single adviser made of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum AdviserOutcome {
    /// A definitive decision.
    Decided(AdviserResponse),
    /// The decision arrives later under this correlation id.
    Deferred(CorrelationId),
}

/// Inputs available to an adviser.
#[derive(Debug, Clone, Copy)]
pub struct AdvisingContext<'a> {
    /// The finished attempt, with its final status and failure details.
    pub node_execution: &'a NodeExecution,
    /// Parameters of the obtainment that selected this adviser.
    pub parameters: &'a Value,
}

impl AdvisingContext<'_> {
    /// Status the attempt finished with.
    #[inline]
    pub fn status(&self) -> Status {
        self.node_execution.status
    }
}

/// Decides what happens after an attempt.
#[async_trait]
pub trait Adviser: Send + Sync {
    /// Returns whether this adviser has an opinion on the attempt.
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool>;

    /// Produces a decision or a deferral.
    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome>;
}

/// Advisers by registered name.
#[derive(Clone, Default)]
pub struct AdviserRegistry {
    advisers: HashMap<String, Arc<dyn Adviser>>,
}

impl std::fmt::Debug for AdviserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.advisers.keys()).finish()
    }
}

impl AdviserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every builtin adviser.
    pub fn with_builtins() -> Self {
        Self::new()
            .register("NEXT_STEP", NextStepAdviser)
            .register("RETRY", RetryAdviser)
            .register("IGNORE_FAILURE", IgnoreFailureAdviser)
            .register("MARK_STATUS", MarkStatusAdviser)
            .register("END_PLAN", EndPlanAdviser)
            .register("MANUAL_INTERVENTION", ManualInterventionAdviser)
    }

    /// Registers an adviser under a name, replacing any previous one.
    pub fn register(mut self, name: impl Into<String>, adviser: impl Adviser + 'static) -> Self {
        self.advisers.insert(name.into(), Arc::new(adviser));
        self
    }

    /// Looks up an adviser.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Adviser>> {
        self.advisers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration().with_message(format!("no adviser registered as {name}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn response_envelope_is_tagged() {
        let response = AdviserResponse::Retry {
            wait_ms: 100,
            new_parameters: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"type": "RETRY", "wait_ms": 100}));
        assert_eq!(response.as_str(), "RETRY");

        let unknown: AdviserResponse = serde_json::from_value(json!({"type": "UNKNOWN"})).unwrap();
        assert_eq!(unknown, AdviserResponse::Unknown);
    }

    #[test]
    fn builtins_are_registered() {
        let registry = AdviserRegistry::with_builtins();
        assert!(registry.get("RETRY").is_ok());
        assert!(registry.get("ON_FAIL").is_err());
    }
}

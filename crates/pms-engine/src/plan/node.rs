//! Plan node definitions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::types::{PlanNodeId, StepType};

/// Decodes obtainment parameters, treating `null` as the default value.
///
/// Malformed parameters are a wiring mistake in the compiled plan and are
/// reported as [`ErrorKind::Configuration`].
///
/// [`ErrorKind::Configuration`]: crate::ErrorKind::Configuration
pub fn decode_parameters<T>(parameters: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if parameters.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(parameters.clone()).map_err(|error| {
        Error::configuration()
            .with_message("invalid obtainment parameters")
            .with_source(error)
    })
}

/// How a node's skip condition affects the graph below it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipGraphType {
    /// The node runs normally.
    #[default]
    Noop,
    /// Only this node is skipped.
    SkipNode,
    /// This node and everything it would spawn are skipped.
    SkipTree,
}

impl SkipGraphType {
    /// Returns whether the node is skipped without executing.
    #[inline]
    pub fn is_skip(self) -> bool {
        !matches!(self, Self::Noop)
    }
}

/// Reference to a facilitator to consult before a node executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    /// Registered facilitator name, e.g. `"ASYNC"`.
    #[serde(rename = "type")]
    pub facilitator_type: String,
    /// Facilitator-specific parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl FacilitatorObtainment {
    /// Creates an obtainment without parameters.
    pub fn new(facilitator_type: impl Into<String>) -> Self {
        Self {
            facilitator_type: facilitator_type.into(),
            parameters: Value::Null,
        }
    }

    /// Sets the parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Reference to an adviser to consult after a node finishes an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    /// Registered adviser name, e.g. `"NEXT_STEP"`.
    #[serde(rename = "type")]
    pub adviser_type: String,
    /// Adviser-specific parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    /// Creates an obtainment without parameters.
    pub fn new(adviser_type: impl Into<String>) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters: Value::Null,
        }
    }

    /// Sets the parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Named reference to an outcome produced by another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefObject {
    /// Name the value is exposed under to the consuming step.
    pub name: String,
    /// Node whose outcome is read.
    pub producer: PlanNodeId,
    /// Outcome key on the producer.
    pub key: String,
}

impl RefObject {
    /// Creates a reference.
    pub fn new(name: impl Into<String>, producer: PlanNodeId, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer,
            key: key.into(),
        }
    }
}

/// A single immutable node of a compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique node id.
    pub id: PlanNodeId,
    /// Display name.
    pub name: String,
    /// User-facing identifier, unique among siblings.
    pub identifier: String,
    /// Selects the step implementation.
    pub step_type: StepType,
    /// Optional group (e.g. `STAGE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Opaque step-specific parameters.
    #[serde(default)]
    pub step_parameters: Value,
    /// Inputs read from other nodes' outcomes.
    #[serde(default)]
    pub ref_objects: Vec<RefObject>,
    /// Advisers to consult, in order.
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    /// Facilitators to consult, in order.
    #[serde(default)]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
    /// Whether skip evaluation should consider the enclosing nodes' chain.
    #[serde(default)]
    pub skip_expression_chain: bool,
    /// Skip behaviour.
    #[serde(default)]
    pub skip_graph_type: SkipGraphType,
    /// Upper bound on how long the node may wait for async callbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Id of the node this one is a retry clone of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<PlanNodeId>,
}

impl PlanNode {
    /// Creates a node with the given identifier and step type.
    pub fn new(identifier: impl Into<String>, step_type: StepType) -> Self {
        let identifier = identifier.into();
        Self {
            id: PlanNodeId::new(),
            name: identifier.clone(),
            identifier,
            step_type,
            group: None,
            step_parameters: Value::Null,
            ref_objects: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
            skip_expression_chain: false,
            skip_graph_type: SkipGraphType::Noop,
            timeout_ms: None,
            retry_of: None,
        }
    }

    /// Sets the id.
    pub fn with_id(mut self, id: PlanNodeId) -> Self {
        self.id = id;
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the step parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    /// Appends a ref object.
    pub fn with_ref_object(mut self, ref_object: RefObject) -> Self {
        self.ref_objects.push(ref_object);
        self
    }

    /// Appends a facilitator obtainment.
    pub fn with_facilitator(mut self, obtainment: FacilitatorObtainment) -> Self {
        self.facilitator_obtainments.push(obtainment);
        self
    }

    /// Appends an adviser obtainment.
    pub fn with_adviser(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    /// Sets the skip behaviour.
    pub fn with_skip(mut self, skip_graph_type: SkipGraphType) -> Self {
        self.skip_graph_type = skip_graph_type;
        self
    }

    /// Sets the async wait timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Produces a structurally identical node with a new identity.
    ///
    /// When `new_parameters` is `None` the original parameters are kept.
    pub fn clone_for_retry(&self, new_parameters: Option<Value>) -> Self {
        let mut node = self.clone();
        node.id = PlanNodeId::new();
        node.retry_of = Some(self.retry_of.unwrap_or(self.id));
        if let Some(parameters) = new_parameters {
            node.step_parameters = parameters;
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn clone_for_retry_keeps_structure() {
        let node = PlanNode::new("build", StepType::new("SHELL"))
            .with_parameters(json!({"script": "make"}))
            .with_adviser(AdviserObtainment::new("RETRY"));

        let same = node.clone_for_retry(None);
        assert_ne!(same.id, node.id);
        assert_eq!(same.retry_of, Some(node.id));
        assert_eq!(same.step_parameters, node.step_parameters);
        assert_eq!(same.adviser_obtainments, node.adviser_obtainments);

        let replaced = same.clone_for_retry(Some(json!({"script": "make -j1"})));
        assert_eq!(replaced.retry_of, Some(node.id));
        assert_eq!(replaced.step_parameters["script"], "make -j1");
        assert_eq!(replaced.identifier, "build");
    }

    #[test]
    fn node_deserializes_with_defaults() {
        let id = PlanNodeId::new();
        let node: PlanNode = serde_json::from_value(json!({
            "id": id,
            "name": "Wait",
            "identifier": "wait",
            "step_type": {"type": "WAIT"},
            "skip_graph_type": "SKIP_TREE",
        }))
        .unwrap();
        assert_eq!(node.id, id);
        assert!(node.skip_graph_type.is_skip());
        assert!(node.adviser_obtainments.is_empty());
        assert!(node.step_parameters.is_null());
    }
}

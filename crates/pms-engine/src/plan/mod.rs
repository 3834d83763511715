//! Immutable compiled plans.
//!
//! A [`Plan`] is built once through [`PlanBuilder`] and never mutated. Nodes
//! are kept sorted by id so lookups are a binary search, independent of the
//! order they were added in.

mod node;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::node::{
    AdviserObtainment, FacilitatorObtainment, PlanNode, RefObject, SkipGraphType,
    decode_parameters,
};
use crate::error::{Error, Result};
use crate::types::{PlanId, PlanNodeId};

/// Compiled execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanBuilder", into = "PlanBuilder")]
pub struct Plan {
    id: PlanId,
    nodes: Vec<PlanNode>,
    starting_node_id: PlanNodeId,
    setup_abstractions: BTreeMap<String, String>,
}

impl Plan {
    /// Returns a builder for a new plan.
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    /// Returns the plan id.
    #[inline]
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Returns the nodes, sorted by id.
    #[inline]
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Returns the number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the plan has no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the starting node id.
    #[inline]
    pub fn starting_node_id(&self) -> PlanNodeId {
        self.starting_node_id
    }

    /// Returns the setup abstractions.
    #[inline]
    pub fn setup_abstractions(&self) -> &BTreeMap<String, String> {
        &self.setup_abstractions
    }

    /// Returns the starting node.
    pub fn fetch_starting_node(&self) -> Result<&PlanNode> {
        self.fetch_node(self.starting_node_id)
    }

    /// Looks up a node by id.
    pub fn fetch_node(&self, id: PlanNodeId) -> Result<&PlanNode> {
        self.nodes
            .binary_search_by(|node| node.id.cmp(&id))
            .map(|index| &self.nodes[index])
            .map_err(|_| Error::not_found().with_message(format!("plan node {id}")))
    }
}

/// Builder for [`Plan`].
///
/// Also the serialized form of a plan: deserialization goes through
/// [`PlanBuilder::build`] so a persisted plan is validated and re-sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanBuilder {
    #[serde(default)]
    id: Option<PlanId>,
    #[serde(default)]
    nodes: Vec<PlanNode>,
    #[serde(default)]
    starting_node_id: Option<PlanNodeId>,
    #[serde(default)]
    setup_abstractions: BTreeMap<String, String>,
}

impl PlanBuilder {
    /// Sets the plan id. A fresh id is generated otherwise.
    pub fn id(mut self, id: PlanId) -> Self {
        self.id = Some(id);
        self
    }

    /// Adds a node.
    pub fn add_node(mut self, node: PlanNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Sets the starting node.
    pub fn starting_node_id(mut self, id: PlanNodeId) -> Self {
        self.starting_node_id = Some(id);
        self
    }

    /// Adds a setup abstraction.
    pub fn setup_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setup_abstractions.insert(key.into(), value.into());
        self
    }

    /// Validates and builds the plan.
    ///
    /// Fails with [`ErrorKind::InvalidPlan`] when the starting node is missing
    /// or unknown, or when two nodes share an id.
    ///
    /// [`ErrorKind::InvalidPlan`]: crate::ErrorKind::InvalidPlan
    pub fn build(self) -> Result<Plan> {
        let mut nodes = self.nodes;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(pair) = nodes.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(Error::invalid_plan().with_message(format!("duplicate node id {}", pair[0].id)));
        }

        let starting_node_id = self
            .starting_node_id
            .ok_or_else(|| Error::invalid_plan().with_message("starting node id not set"))?;
        if nodes
            .binary_search_by(|node| node.id.cmp(&starting_node_id))
            .is_err()
        {
            return Err(Error::invalid_plan()
                .with_message(format!("starting node {starting_node_id} not in plan")));
        }

        Ok(Plan {
            id: self.id.unwrap_or_default(),
            nodes,
            starting_node_id,
            setup_abstractions: self.setup_abstractions,
        })
    }
}

impl TryFrom<PlanBuilder> for Plan {
    type Error = Error;

    fn try_from(builder: PlanBuilder) -> Result<Self> {
        builder.build()
    }
}

impl From<Plan> for PlanBuilder {
    fn from(plan: Plan) -> Self {
        Self {
            id: Some(plan.id),
            nodes: plan.nodes,
            starting_node_id: Some(plan.starting_node_id),
            setup_abstractions: plan.setup_abstractions,
        }
    }
}

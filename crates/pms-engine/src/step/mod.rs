//! Step implementations and their contract with the engine.
//!
//! A [`Step`] implements only the entry points matching the execution modes
//! it supports; every other entry point fails with a configuration error,
//! which the engine turns into an `ERRORED` node.

mod task;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use self::task::{ChannelTaskQueue, DelegateTask, TaskQueue, TaskRequest};
use crate::error::{Error, Result};
use crate::notify::{ResponseData, StepNotify};
use crate::plan::PlanNode;
use crate::types::{
    Ambiance, CorrelationId, FailureInfo, NodeExecutionId, PlanNodeId, Status, StepResponse,
    StepType,
};

/// Everything a step sees when it is invoked.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Context of the attempt; its last level is this attempt.
    pub ambiance: Ambiance,
    /// Attempt being executed.
    pub node_execution_id: NodeExecutionId,
    /// Node being executed.
    pub node: PlanNode,
    /// Resolved ref objects, by name.
    pub inputs: BTreeMap<String, Value>,
}

impl StepContext {
    /// Returns the raw step parameters.
    #[inline]
    pub fn parameters(&self) -> &Value {
        &self.node.step_parameters
    }

    /// Decodes the step parameters.
    ///
    /// Malformed parameters are reported as a step error so the node fails
    /// through the ordinary advise path.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.node.step_parameters.clone()).map_err(|error| {
            Error::step()
                .with_message(format!("invalid parameters for {}", self.node.identifier))
                .with_source(error)
        })
    }

    /// Returns a resolved input by name.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }
}

/// What an async step hands back after dispatching its work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncExecutable {
    /// Ids the node waits on; every one must be delivered.
    pub callback_ids: Vec<CorrelationId>,
    /// Expire the node if the callbacks have not all arrived in time.
    pub timeout: Option<Duration>,
}

impl AsyncExecutable {
    /// Waits on the given ids without timeout.
    pub fn new(callback_ids: impl IntoIterator<Item = CorrelationId>) -> Self {
        Self {
            callback_ids: callback_ids.into_iter().collect(),
            timeout: None,
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn unsupported(ctx: &StepContext, mode: &str) -> Error {
    Error::configuration().with_message(format!(
        "step {} does not support {mode} execution",
        ctx.node.step_type
    ))
}

/// A step implementation.
#[async_trait]
pub trait Step: Send + Sync {
    /// Runs the step to completion.
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        Err(unsupported(ctx, "SYNC"))
    }

    /// Dispatches work and returns the ids to wait on.
    async fn execute_async(&self, ctx: &StepContext) -> Result<AsyncExecutable> {
        Err(unsupported(ctx, "ASYNC"))
    }

    /// Builds the response once every async callback (or the delegate task)
    /// has answered.
    ///
    /// The default reads a [`StepResponse`] from a single payload and
    /// otherwise succeeds, exposing the payloads as outcomes.
    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: &BTreeMap<CorrelationId, ResponseData>,
    ) -> Result<StepResponse> {
        if let Some(failure) = responses.values().find_map(ResponseData::as_failure) {
            return Ok(StepResponse::failed(failure.clone()));
        }

        let mut payloads = responses.iter().filter_map(|(id, data)| match data {
            ResponseData::Payload(value) => Some((id, value)),
            _ => None,
        });
        if responses.len() == 1
            && let Some((_, value)) = payloads.next()
            && let Ok(response) = serde_json::from_value::<StepResponse>(value.clone())
        {
            return Ok(response);
        }

        Ok(responses
            .iter()
            .filter_map(|(id, data)| match data {
                ResponseData::Payload(value) => Some((id.to_string(), value.clone())),
                _ => None,
            })
            .fold(StepResponse::succeeded(), |response, (id, value)| {
                response.with_outcome(id, value)
            }))
    }

    /// Describes the delegate task to queue.
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskRequest> {
        Err(unsupported(ctx, "TASK"))
    }

    /// Selects the single child to spawn.
    async fn obtain_child(&self, ctx: &StepContext) -> Result<PlanNodeId> {
        Err(unsupported(ctx, "CHILD"))
    }

    /// Selects the children to spawn.
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<PlanNodeId>> {
        Err(unsupported(ctx, "CHILDREN"))
    }

    /// Builds the response once every child chain has finished.
    ///
    /// The default rolls the children's final statuses up with
    /// [`Status::aggregate`].
    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        children: &[StepNotify],
    ) -> Result<StepResponse> {
        let status = Status::aggregate(children.iter().map(|child| child.status));
        Ok(if status.is_broken() {
            let failed = children.iter().filter(|c| c.status.is_broken()).count();
            StepResponse::with_status(status)
                .with_failure_info(FailureInfo::new(format!("{failed} child node(s) did not succeed")))
        } else {
            StepResponse::with_status(status)
        })
    }
}

/// Step implementations by step type name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.steps.keys()).finish()
    }
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step for a step type name, replacing any previous one.
    pub fn register(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.insert(name.into(), Arc::new(step));
        self
    }

    /// Returns whether a step is registered for the type.
    pub fn contains(&self, step_type: &StepType) -> bool {
        self.steps.contains_key(&step_type.name)
    }

    /// Looks up the step for a type.
    pub fn get(&self, step_type: &StepType) -> Result<Arc<dyn Step>> {
        self.steps
            .get(&step_type.name)
            .cloned()
            .ok_or_else(|| Error::configuration().with_message(format!("no step registered for {step_type}")))
    }
}

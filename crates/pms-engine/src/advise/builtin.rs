//! Builtin advisers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Adviser, AdviserOutcome, AdviserResponse, AdvisingContext};
use crate::error::{Error, Result};
use crate::plan::decode_parameters;
use crate::types::{CorrelationId, FailureType, PlanNodeId, Status};

/// Broken statuses an adviser may act on by default. Aborts are final.
const RECOVERABLE: &[Status] = &[Status::Failed, Status::Errored, Status::Expired];

fn failure_matches(ctx: AdvisingContext<'_>, failure_types: &[FailureType]) -> bool {
    failure_types.is_empty()
        || ctx
            .node_execution
            .failure_info
            .as_ref()
            .is_some_and(|info| failure_types.iter().any(|t| info.has_type(*t)))
}

#[derive(Debug, Default, Deserialize)]
struct NextStepParameters {
    next_node_id: Option<PlanNodeId>,
}

/// Moves on to a sibling after a positive status.
///
/// Parameters: `{ "next_node_id": PlanNodeId }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextStepAdviser;

#[async_trait]
impl Adviser for NextStepAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        let parameters: NextStepParameters = decode_parameters(ctx.parameters)?;
        Ok(ctx.status().is_positive() && parameters.next_node_id.is_some())
    }

    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        let parameters: NextStepParameters = decode_parameters(ctx.parameters)?;
        let next_node_id = parameters
            .next_node_id
            .ok_or_else(|| Error::configuration().with_message("next step without next_node_id"))?;
        Ok(AdviserOutcome::Decided(AdviserResponse::NextStep { next_node_id }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RetryParameters {
    #[serde(default)]
    retry_count: usize,
    #[serde(default)]
    wait_intervals_ms: Vec<u64>,
    #[serde(default)]
    failure_types: Vec<FailureType>,
    #[serde(default)]
    new_parameters: Option<Value>,
}

/// Retries a failed attempt up to `retry_count` times.
///
/// Parameters: `{ "retry_count": usize, "wait_intervals_ms": [u64],
/// "failure_types": [FailureType], "new_parameters": any }`. The n-th retry
/// waits `wait_intervals_ms[n]`, reusing the last interval once the list
/// runs out. An empty `failure_types` list matches every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAdviser;

#[async_trait]
impl Adviser for RetryAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        let parameters: RetryParameters = decode_parameters(ctx.parameters)?;
        Ok(RECOVERABLE.contains(&ctx.status())
            && ctx.node_execution.retry_ids.len() < parameters.retry_count
            && failure_matches(ctx, &parameters.failure_types))
    }

    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        let parameters: RetryParameters = decode_parameters(ctx.parameters)?;
        let attempt = ctx.node_execution.retry_ids.len();
        let wait_ms = parameters
            .wait_intervals_ms
            .get(attempt)
            .or(parameters.wait_intervals_ms.last())
            .copied()
            .unwrap_or_default();
        Ok(AdviserOutcome::Decided(AdviserResponse::Retry {
            wait_ms,
            new_parameters: parameters.new_parameters,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct IgnoreFailureParameters {
    #[serde(default)]
    failure_types: Vec<FailureType>,
    #[serde(default)]
    next_node_id: Option<PlanNodeId>,
}

/// Marks a failed attempt `IGNORE_FAILED`, optionally moving on.
///
/// Parameters: `{ "failure_types": [FailureType], "next_node_id": PlanNodeId }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreFailureAdviser;

#[async_trait]
impl Adviser for IgnoreFailureAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        let parameters: IgnoreFailureParameters = decode_parameters(ctx.parameters)?;
        Ok(RECOVERABLE.contains(&ctx.status()) && failure_matches(ctx, &parameters.failure_types))
    }

    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        let parameters: IgnoreFailureParameters = decode_parameters(ctx.parameters)?;
        Ok(AdviserOutcome::Decided(AdviserResponse::IgnoreFailure {
            next_node_id: parameters.next_node_id,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct MarkStatusParameters {
    #[serde(default)]
    from: Vec<Status>,
    to: Option<Status>,
}

/// Overrides a broken status.
///
/// Parameters: `{ "from": [Status], "to": Status }`. `from` defaults to
/// `FAILED`, `ERRORED` and `EXPIRED`; only broken statuses are honoured.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkStatusAdviser;

#[async_trait]
impl Adviser for MarkStatusAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        let parameters: MarkStatusParameters = decode_parameters(ctx.parameters)?;
        let status = ctx.status();
        let from_matches = if parameters.from.is_empty() {
            RECOVERABLE.contains(&status)
        } else {
            parameters.from.contains(&status)
        };
        Ok(status.is_broken() && from_matches && parameters.to.is_some_and(Status::is_final))
    }

    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        let parameters: MarkStatusParameters = decode_parameters(ctx.parameters)?;
        let status = parameters
            .to
            .ok_or_else(|| Error::configuration().with_message("mark status without target"))?;
        Ok(AdviserOutcome::Decided(AdviserResponse::MarkStatus { status }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct EndPlanParameters {
    #[serde(default)]
    on: Vec<Status>,
}

/// Ends the whole plan execution when the attempt finishes in one of `on`.
///
/// Parameters: `{ "on": [Status] }`; an empty list means every broken status.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndPlanAdviser;

#[async_trait]
impl Adviser for EndPlanAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        let parameters: EndPlanParameters = decode_parameters(ctx.parameters)?;
        let status = ctx.status();
        Ok(if parameters.on.is_empty() {
            status.is_broken()
        } else {
            parameters.on.contains(&status)
        })
    }

    async fn advise(&self, _ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        Ok(AdviserOutcome::Decided(AdviserResponse::EndPlan))
    }
}

/// Hands a broken attempt to an operator.
///
/// The decision is deferred under the node execution id; the operator
/// answers by delivering an adviser response for that id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualInterventionAdviser;

#[async_trait]
impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, ctx: AdvisingContext<'_>) -> Result<bool> {
        Ok(RECOVERABLE.contains(&ctx.status()))
    }

    async fn advise(&self, ctx: AdvisingContext<'_>) -> Result<AdviserOutcome> {
        Ok(AdviserOutcome::Deferred(CorrelationId::from(
            ctx.node_execution.id,
        )))
    }
}

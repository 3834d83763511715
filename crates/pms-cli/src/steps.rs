//! Demo steps shipped with the CLI.
//!
//! Just enough to exercise every execution mode from a plan file:
//!
//! | step type  | mode       | behaviour                                        |
//! |------------|------------|--------------------------------------------------|
//! | `NOOP`     | `SYNC`     | succeeds                                         |
//! | `ECHO`     | `SYNC`     | succeeds with its parameters and inputs as outcomes |
//! | `FAIL`     | `SYNC`     | fails with `parameters.message`                  |
//! | `DELEGATE` | `TASK`     | queues `parameters` as a task for the local worker |
//! | `FAN_OUT`  | `CHILDREN` | spawns `parameters.children`                     |

use async_trait::async_trait;
use pms_engine::Result;
use pms_engine::step::{Step, StepContext, StepRegistry, TaskRequest};
use pms_engine::types::{FailureInfo, FailureType, PlanNodeId, StepResponse};
use serde::Deserialize;

/// Returns a registry holding every demo step.
pub fn registry() -> StepRegistry {
    StepRegistry::new()
        .register("NOOP", Noop)
        .register("ECHO", Echo)
        .register("FAIL", Fail)
        .register("DELEGATE", Delegate)
        .register("FAN_OUT", FanOut)
}

struct Noop;

#[async_trait]
impl Step for Noop {
    async fn execute_sync(&self, _ctx: &StepContext) -> Result<StepResponse> {
        Ok(StepResponse::succeeded())
    }
}

struct Echo;

#[async_trait]
impl Step for Echo {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        let response = StepResponse::succeeded().with_outcome("parameters", ctx.parameters().clone());
        Ok(ctx
            .inputs
            .iter()
            .fold(response, |response, (name, value)| {
                response.with_outcome(name.clone(), value.clone())
            }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FailParameters {
    #[serde(default)]
    message: Option<String>,
}

struct Fail;

#[async_trait]
impl Step for Fail {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        let parameters: FailParameters = if ctx.parameters().is_null() {
            FailParameters::default()
        } else {
            ctx.parameters_as()?
        };
        let message = parameters.message.unwrap_or_else(|| "step failed".into());
        Ok(StepResponse::failed(
            FailureInfo::new(message).with_type(FailureType::Application),
        ))
    }
}

struct Delegate;

#[async_trait]
impl Step for Delegate {
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskRequest> {
        ctx.parameters_as()
    }
}

#[derive(Debug, Deserialize)]
struct FanOutParameters {
    children: Vec<PlanNodeId>,
}

struct FanOut;

#[async_trait]
impl Step for FanOut {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<PlanNodeId>> {
        let parameters: FanOutParameters = ctx.parameters_as()?;
        Ok(parameters.children)
    }
}

//! Continuations fired by the notify engine.

use super::OrchestrationEngine;
use crate::TRACING_TARGET_ENGINE;
use crate::advise::AdviserResponse;
use crate::error::{Error, Result};
use crate::notify::{Continuation, Notification, ResponseData, StepNotify, WakePhase};
use crate::types::{ExecutionMode, FailureInfo, NodeExecutionId, StepResponse};

impl OrchestrationEngine {
    pub(crate) async fn resume(&self, notification: Notification) -> Result<()> {
        let failure = notification.failure().cloned();
        tracing::debug!(
            target: TRACING_TARGET_ENGINE,
            node_execution_id = %notification.continuation.node_execution_id(),
            is_error = notification.is_error,
            responses = notification.responses.len(),
            "wait fired"
        );

        match notification.continuation {
            Continuation::Resume { node_execution_id } => {
                self.resume_node_execution(node_execution_id, notification, failure)
                    .await
            }
            Continuation::AdviseResume { node_execution_id } => {
                let execution = self.node_executions().get(node_execution_id).await?;
                if execution.adviser_response.is_some() {
                    tracing::debug!(
                        target: TRACING_TARGET_ENGINE,
                        node_execution_id = %node_execution_id,
                        "node execution already advised"
                    );
                    return Ok(());
                }
                let response = if notification.is_error {
                    AdviserResponse::Unknown
                } else {
                    notification
                        .responses
                        .into_values()
                        .find_map(|data| match data {
                            ResponseData::Adviser(response) => Some(response),
                            _ => None,
                        })
                        .unwrap_or(AdviserResponse::Unknown)
                };
                self.handle_advise(execution, response).await
            }
            Continuation::FacilitateResume { node_execution_id } => {
                if notification.is_error {
                    return self
                        .handle_step_response(node_execution_id, failed(failure))
                        .await;
                }
                let response = notification
                    .responses
                    .into_values()
                    .find_map(|data| match data {
                        ResponseData::Facilitator(response) => Some(response),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        Error::serialization().with_message("deferred facilitation carried no facilitator response")
                    })?;
                self.apply_facilitator_response(node_execution_id, response)
                    .await
            }
            Continuation::Wake {
                node_execution_id,
                phase,
            } => {
                if notification.is_error {
                    return self
                        .handle_step_response(node_execution_id, failed(failure))
                        .await;
                }
                match phase {
                    WakePhase::Start => self.start_node_execution(node_execution_id).await,
                    WakePhase::Execute => {
                        let execution = self.node_executions().get(node_execution_id).await?;
                        let mode = execution.mode.ok_or_else(|| {
                            Error::internal()
                                .with_message(format!("node execution {node_execution_id} woke without a mode"))
                        })?;
                        self.invoke_execution(node_execution_id, mode).await
                    }
                }
            }
        }
    }

    async fn resume_node_execution(
        &self,
        id: NodeExecutionId,
        notification: Notification,
        failure: Option<FailureInfo>,
    ) -> Result<()> {
        let execution = self.node_executions().get(id).await?;
        if execution.is_final() {
            return self.conclude(id).await;
        }
        if notification.is_error {
            return self.handle_step_response(id, failed(failure)).await;
        }

        let step = self.inner.steps.get(&execution.node.step_type)?;
        let ctx = self.step_context(&execution).await?;
        let response = match execution.mode {
            Some(ExecutionMode::Child | ExecutionMode::Children) => {
                let children: Vec<StepNotify> = notification
                    .responses
                    .into_values()
                    .filter_map(|data| match data {
                        ResponseData::StepNotify(notify) => Some(notify),
                        _ => None,
                    })
                    .collect();
                step.handle_children_response(&ctx, &children).await?
            }
            _ => {
                step.handle_async_response(&ctx, &notification.responses)
                    .await?
            }
        };
        self.handle_step_response(id, response).await
    }
}

fn failed(failure: Option<FailureInfo>) -> StepResponse {
    StepResponse::failed(failure.unwrap_or_else(|| FailureInfo::new("wait failed")))
}

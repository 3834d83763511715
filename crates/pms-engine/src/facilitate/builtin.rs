//! Builtin facilitators.

use async_trait::async_trait;
use serde::Deserialize;

use super::{FacilitateContext, Facilitator, FacilitatorOutcome, FacilitatorResponse};
use crate::error::Result;
use crate::plan::decode_parameters;
use crate::types::ExecutionMode;

#[derive(Debug, Default, Deserialize)]
struct ModeParameters {
    #[serde(default)]
    initial_wait_ms: u64,
}

/// Always decides a fixed execution mode.
///
/// Parameters: `{ "initial_wait_ms": u64 }`, optional.
#[derive(Debug, Clone, Copy)]
pub struct ModeFacilitator {
    mode: ExecutionMode,
}

impl ModeFacilitator {
    /// Creates a facilitator deciding `mode`.
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Facilitator for ModeFacilitator {
    async fn facilitate(&self, ctx: FacilitateContext<'_>) -> Result<FacilitatorOutcome> {
        let parameters: ModeParameters = decode_parameters(ctx.parameters)?;
        Ok(FacilitatorOutcome::Decided(
            FacilitatorResponse::new(self.mode).with_initial_wait_ms(parameters.initial_wait_ms),
        ))
    }
}

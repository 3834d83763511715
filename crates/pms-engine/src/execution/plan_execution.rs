//! Plan execution record.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::types::{Ambiance, ExecutionMetadata, PlanExecutionId, PlanId, Status};

/// One run of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    /// Unique run id.
    pub id: PlanExecutionId,
    /// Plan being run.
    pub plan_id: PlanId,
    /// Current status.
    pub status: Status,
    /// Root context of the run.
    pub ambiance: Ambiance,
    /// Trigger metadata.
    #[serde(default)]
    pub metadata: ExecutionMetadata,
    /// When the run started.
    pub start_ts: Timestamp,
    /// When the run finished; set exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<Timestamp>,
    /// Bumped on every write.
    #[serde(default)]
    pub version: u64,
}

impl PlanExecution {
    /// Creates a running plan execution with a fresh id.
    pub fn new(plan_id: PlanId, metadata: ExecutionMetadata) -> Self {
        let id = PlanExecutionId::new();
        let ambiance = Ambiance::new(plan_id, id).with_metadata(metadata.clone());
        Self {
            id,
            plan_id,
            status: Status::Running,
            ambiance,
            metadata,
            start_ts: Timestamp::now(),
            end_ts: None,
            version: 0,
        }
    }

    /// Sets the root ambiance.
    pub fn with_ambiance(mut self, ambiance: Ambiance) -> Self {
        self.ambiance = ambiance;
        self
    }

    /// Returns whether the run has reached a final status.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}

//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use pms_engine::prelude::*;
//! ```

pub use crate::advise::{Adviser, AdviserOutcome, AdviserRegistry, AdviserResponse};
pub use crate::engine::{EngineBuilder, EngineConfig, Finalization, OrchestrationEngine};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::execution::{MemoryStore, NodeExecution, PlanExecution};
pub use crate::facilitate::{Facilitator, FacilitatorOutcome, FacilitatorRegistry, FacilitatorResponse};
pub use crate::notify::{NotifyEngine, ResponseData};
pub use crate::plan::{Plan, PlanBuilder, PlanNode};
pub use crate::step::{AsyncExecutable, ChannelTaskQueue, Step, StepContext, StepRegistry, TaskRequest};
pub use crate::types::{
    CorrelationId, ExecutionMetadata, ExecutionMode, FailureInfo, NodeExecutionId, PlanExecutionId,
    PlanNodeId, Status, StepResponse, StepType,
};

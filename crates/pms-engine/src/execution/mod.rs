//! Execution records, their repositories and services.

mod memory;
mod node_execution;
mod plan_execution;
mod service;
mod store;

pub use self::memory::MemoryStore;
pub use self::node_execution::{NodeExecution, ProgressUpdate, StepDetails, UpdateNodeExecution};
pub use self::plan_execution::PlanExecution;
pub use self::service::{NodeExecutionService, PlanExecutionService};
pub use self::store::{NodeExecutionRepository, PlanExecutionRepository, PlanRepository};

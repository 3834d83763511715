//! Loading plans from disk.

use std::path::Path;

use anyhow::Context;
use pms_engine::plan::Plan;

/// Reads and validates a JSON plan.
pub async fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("invalid plan file {}", path.display()))
}

//! Engine configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "config", derive(Args))]
pub struct EngineConfig {
    /// Maximum number of engine tasks running at once.
    #[builder(default = "64")]
    #[cfg_attr(
        feature = "config",
        arg(long = "max-concurrent-tasks", env = "PMS_MAX_CONCURRENT_TASKS", default_value_t = 64)
    )]
    pub max_concurrent_tasks: usize,

    /// Conditional finalize writes attempted before falling back to `ERRORED`.
    #[builder(default = "3")]
    #[cfg_attr(
        feature = "config",
        arg(long = "finalize-attempts", env = "PMS_FINALIZE_ATTEMPTS", default_value_t = 3)
    )]
    pub finalize_attempts: u32,

    /// Timeout applied to async and task waits that do not set their own,
    /// in seconds. Zero disables it.
    #[builder(default = "0")]
    #[cfg_attr(
        feature = "config",
        arg(long = "default-timeout-secs", env = "PMS_DEFAULT_TIMEOUT_SECS", default_value_t = 0)
    )]
    pub default_timeout_secs: u64,

    /// How long consumed correlation ids and unclaimed early deliveries
    /// are remembered, in seconds.
    #[builder(default = "3600")]
    #[cfg_attr(
        feature = "config",
        arg(long = "notify-retention-secs", env = "PMS_NOTIFY_RETENTION_SECS", default_value_t = 3600)
    )]
    pub notify_retention_secs: u64,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == Some(0) {
            return Err("max_concurrent_tasks must be at least 1".into());
        }
        if self.finalize_attempts == Some(0) {
            return Err("finalize_attempts must be at least 1".into());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Returns the default wait timeout, if enabled.
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs))
    }

    /// Returns the notify retention window.
    pub fn notify_retention(&self) -> Duration {
        Duration::from_secs(self.notify_retention_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 64,
            finalize_attempts: 3,
            default_timeout_secs: 0,
            notify_retention_secs: 3600,
        }
    }
}

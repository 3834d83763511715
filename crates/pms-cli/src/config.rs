//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── command: Command         # run | validate
//! ├── engine: EngineConfig     # worker pool, finalize attempts, default timeout
//! └── log_format: LogFormat    # text | json
//! ```
//!
//! Engine options can be given as arguments or environment variables:
//!
//! ```bash
//! pms --max-concurrent-tasks 8 run --plan plan.json
//! PMS_DEFAULT_TIMEOUT_SECS=30 pms run --plan plan.json
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use pms_engine::engine::EngineConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pms")]
#[command(about = "Runs compiled plans on the orchestration engine")]
#[command(version)]
pub struct Cli {
    /// What to do.
    #[command(subcommand)]
    pub command: Command,

    /// Engine configuration.
    #[clap(flatten)]
    pub engine: EngineConfig,

    /// Log output format.
    #[arg(long, global = true, env = "PMS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// CLI subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Executes a plan file and prints the final plan execution.
    Run {
        /// Path to a JSON plan.
        #[arg(long)]
        plan: PathBuf,

        /// Abort the plan execution after this many seconds.
        #[arg(long, env = "PMS_RUN_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,
    },
    /// Checks that a plan file parses and builds.
    Validate {
        /// Path to a JSON plan.
        #[arg(long)]
        plan: PathBuf,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Loads `.env` (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with `RUST_LOG` filtering, defaulting to `info`.
    pub fn init_tracing(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|e| anyhow::anyhow!("failed to create env filter: {e}"))?;

        let (text, json) = match self.log_format {
            LogFormat::Text => (Some(fmt::layer().with_target(true).with_ansi(true)), None),
            LogFormat::Json => (None, Some(fmt::layer().json().with_target(true))),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(text)
            .with(json)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
    }

    /// Validates configuration values clap cannot check.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.max_concurrent_tasks == 0 {
            anyhow::bail!("--max-concurrent-tasks must be at least 1");
        }
        if self.engine.finalize_attempts == 0 {
            anyhow::bail!("--finalize-attempts must be at least 1");
        }
        Ok(())
    }

    /// Logs build information and the effective configuration.
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            max_concurrent_tasks = self.engine.max_concurrent_tasks,
            finalize_attempts = self.engine.finalize_attempts,
            default_timeout_secs = self.engine.default_timeout_secs,
            notify_retention_secs = self.engine.notify_retention_secs,
            log_format = ?self.log_format,
            "engine configuration"
        );
    }

    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

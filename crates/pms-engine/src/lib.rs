#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for the engine's node lifecycle.
///
/// Use this target for logging plan starts and ends, node transitions,
/// advise decisions and invariant violations.
pub const TRACING_TARGET_ENGINE: &str = "pms_engine::engine";

/// Tracing target for the notify/wait registry.
pub const TRACING_TARGET_NOTIFY: &str = "pms_engine::notify";

/// Tracing target for SDK response routing.
pub const TRACING_TARGET_SDK: &str = "pms_engine::sdk";

/// Tracing target for execution record writes.
pub const TRACING_TARGET_STORE: &str = "pms_engine::store";

/// Tracing target for observer notification.
pub const TRACING_TARGET_OBSERVER: &str = "pms_engine::observer";

pub mod advise;
pub mod engine;
mod error;
pub mod event;
pub mod execution;
pub mod facilitate;
pub mod notify;
pub mod observer;
pub mod plan;
pub mod sdk;
pub mod step;
pub mod types;

#[doc(hidden)]
pub mod prelude;

pub use error::{Error, ErrorKind, Result};

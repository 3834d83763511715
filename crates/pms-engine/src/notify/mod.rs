//! Notify/wait bridge between asynchronous work and engine continuations.

mod continuation;
mod engine;

pub use self::continuation::{
    Continuation, Notification, ResponseData, StepNotify, WakePhase,
};
pub use self::engine::{DeliveryOutcome, NotifyEngine};

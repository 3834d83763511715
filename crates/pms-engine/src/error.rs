//! Engine error types.

use strum::{AsRefStr, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for all engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur while orchestrating a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Plan failed its build invariants.
    InvalidPlan,
    /// A plan, node, execution or registration does not exist.
    NotFound,
    /// The engine is wired incorrectly (missing handler, facilitator, step).
    Configuration,
    /// A conditional write was rejected by the store.
    Conflict,
    /// Payload could not be encoded or decoded.
    Serialization,
    /// A step implementation reported an error.
    Step,
    /// A unit of work did not complete in time.
    Timeout,
    /// Internal engine error (closed channel, dropped worker).
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case name of this kind.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A structured engine error.
#[derive(Debug, Error)]
#[error("{}{}", .kind.as_str(), .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional error message.
    pub message: Option<String>,
    /// Optional source error.
    #[source]
    pub source: Option<BoxedError>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a source error to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Creates a new invalid plan error.
    pub fn invalid_plan() -> Self {
        Self::new(ErrorKind::InvalidPlan)
    }

    /// Creates a new not found error.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Creates a new configuration error.
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Creates a new conflict error.
    pub fn conflict() -> Self {
        Self::new(ErrorKind::Conflict)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Creates a new step error.
    pub fn step() -> Self {
        Self::new(ErrorKind::Step)
    }

    /// Creates a new timeout error.
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a new internal error.
    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }

    /// Returns the error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    #[inline]
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }

    /// Returns whether this error breaks an engine invariant rather than
    /// reporting a business or transport failure.
    ///
    /// Invariant violations force an `ERRORED` status where a node or plan
    /// is involved; everything else is routed as a `FAILED` step response.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidPlan
                | ErrorKind::NotFound
                | ErrorKind::Configuration
                | ErrorKind::Conflict
                | ErrorKind::Internal
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization()
            .with_message("invalid payload")
            .with_source(error)
    }
}

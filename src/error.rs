use thiserror::Error;

/// A step's argument string is not a valid condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid args {args:?}: expected `<field><relation><threshold> <url>`")]
pub struct ParseError {
    pub args: String,
}

/// A condition names a field the event cannot supply in the needed form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldResolutionError {
    #[error("field {0} was not set")]
    Missing(String),

    #[error("field {0} is not an integer")]
    NotAnInteger(String),

    #[error("field {0} was incompatible type")]
    Incompatible(String),
}

/// Reasons why a single outbound HTTP attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with something other than 200.
    #[error("remote endpoint returned status {0}")]
    Status(u16),
}

/// Failure of a callback, forward, or error report once retries are used up.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to serialise event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        last: TransportError,
    },
}

/// Errors raised by a dedup store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A database URL was given but this build has no driver for it.
    #[error("{0} support is not compiled in")]
    Unsupported(&'static str),
}

/// Result of evaluating the current step of an event.
///
/// None of these affect forwarding; the event always moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Condition matched and the callback answered.
    Fired,

    /// Condition matched but this run already triggered the callback.
    AlreadyCalled,

    /// Condition evaluated to false.
    NoMatch,

    /// The referenced field could not be resolved.
    Unresolved,

    /// The step's argument string did not parse.
    InvalidArgs,

    /// The run's step index does not point at a step.
    StepOutOfRange,

    /// Condition matched but every callback attempt failed.
    CallbackFailed,

    /// The dispatch task ended without producing an outcome.
    Interrupted,
}

/// Result of relaying an event to its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered,

    /// The run has no further steps.
    Completed,

    /// Forwarding failed and an error report was attempted.
    Failed,
}

//! Error taxonomy shared across the engine.
//!
//! - [`ValidationError`]: malformed configuration. Fatal at registration or
//!   resolution time and never retried.
//! - [`CapabilityFailure`]: a task capability could not produce an outcome.
//!   Recovered per step by the flow executor.
//! - [`AuthError`]: auth-state persistence and re-authentication failures.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown task or flow: {0}")]
    UnknownIdentifier(String),

    #[error("Invalid task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("Malformed flow '{flow}': {reason}")]
    MalformedFlow { flow: String, reason: String },

    #[error("Flow '{flow}' step {step} ('{task}') references missing flow argument '{name}'")]
    MissingFlowArgument {
        flow: String,
        step: usize,
        task: String,
        name: String,
    },

    #[error("Invalid schedule entry for '{identifier}': {reason}")]
    InvalidSchedule { identifier: String, reason: String },

    #[error("Invalid profile name: {0:?}")]
    InvalidProfile(String),

    #[error("Invalid schedule profile name: {0:?}")]
    InvalidScheduleProfile(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityFailure {
    #[error("{0}")]
    Failed(String),

    #[error("Task '{task}' timed out after {}s", .after.as_secs_f64())]
    TimedOut { task: String, after: Duration },

    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("Task '{task}' declared {expected} outcomes but returned {actual}")]
    ContractViolation {
        task: String,
        expected: String,
        actual: String,
    },
}

impl CapabilityFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Auth state I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Auth state for '{0}' is not a valid storage snapshot: {1}")]
    InvalidSnapshot(String, String),

    #[error("No cached auth state for profile '{0}'")]
    NotFound(String),

    #[error("Re-authentication for '{0}' could not be confirmed")]
    Unconfirmed(String),

    #[error(transparent)]
    Capability(#[from] CapabilityFailure),
}

pub type AuthResult<T> = Result<T, AuthError>;

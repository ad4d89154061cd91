//! Error types for rvsynth.
//!
//! All errors are strongly typed using thiserror. Compilation problems are
//! reported as [`ValidationError`] before any monitor exists; out-of-sequence
//! lifecycle calls are reported as [`ExecutionError`].

use thiserror::Error;

/// Errors raised while validating or compiling a property.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Pattern '{pattern}' is not supported by the rule compiler")]
    UnsupportedPattern {
        pattern: String,
    },

    #[error("Alias '@{alias}' referenced by an event on '{topic}' is not bound at that point")]
    UnboundAlias {
        alias: String,
        topic: String,
    },

    #[error("Alias '@{alias}' is declared more than once")]
    DuplicateAlias {
        alias: String,
    },

    #[error("Event '{role}' has no topic branches")]
    EmptyEvent {
        role: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid predicate: {reason}")]
    InvalidPredicate {
        reason: String,
    },

    #[error("Invalid time bound: {reason}")]
    InvalidTimeBound {
        reason: String,
    },
}

/// Errors raised while driving a monitor instance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Monitor is already active (state {state})")]
    AlreadyActive {
        state: String,
    },

    #[error("Monitor is not active")]
    NotActive,

    #[error("Lock poisoned: {context}")]
    LockPoisoned {
        context: String,
    },

    #[error("Unknown monitor: {id}")]
    UnknownMonitor {
        id: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for rvsynth.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RvError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RvError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation (compile-time) error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if a lifecycle call was made out of sequence.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::AlreadyActive { .. } | ExecutionError::NotActive)
        )
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// Usage errors are never retryable: the call sequence must be fixed first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
        }
    }
}

/// Result type alias for rvsynth operations.
pub type RvResult<T> = Result<T, RvError>;

//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Class of a transient downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The call did not answer within its deadline.
    Timeout,
    /// The network path to the dependency failed.
    Network,
    /// The dependency reported itself unavailable.
    ServiceUnavailable,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ServiceUnavailable => "service unavailable",
        };
        f.write_str(label)
    }
}

/// Top-level error type for the orchestration core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GameError {
    /// Bad input, rejected immediately and never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is not valid in the current state machine state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A session, member, or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The session has reached its member cap.
    #[error("session {session_id} is full ({capacity} members)")]
    Full {
        /// The session that rejected the join.
        session_id: Uuid,
        /// The member cap in force.
        capacity: usize,
    },

    /// A transient downstream failure.
    #[error("transient {kind} failure: {message}")]
    Transient {
        /// Failure class.
        kind: TransientKind,
        /// Detail from the failing call.
        message: String,
    },

    /// A circuit breaker rejected the call without attempting it.
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl GameError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidState(_) => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Full { .. } => "session_full",
            Self::Transient { .. } => "transient",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Infrastructure(_) => "infrastructure_error",
        }
    }

    /// Shorthand for a missing session.
    #[must_use]
    pub fn session_not_found(session_id: Uuid) -> Self {
        Self::NotFound(format!("session {session_id}"))
    }
}

//! External scoring service collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{GameError, TransientKind};
use crate::model::{DoorId, SubScores};

/// A scenario and response pair to be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub scenario_id: DoorId,
    pub scenario: String,
    pub response: String,
    pub theme: Option<String>,
}

/// Score returned by the scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub score: u8,
    pub sub_scores: SubScores,
}

/// Failure of a single scoring call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScoringError {
    /// The call exceeded its deadline.
    #[error("scoring call timed out")]
    Timeout,
    /// The service could not be reached.
    #[error("network error: {0}")]
    Network(String),
    /// The service answered but reported itself unavailable.
    #[error("scoring service unavailable: {0}")]
    Unavailable(String),
    /// The service rejected the request as invalid.
    #[error("scoring request rejected: {0}")]
    Rejected(String),
    /// A circuit breaker short-circuited the call.
    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl ScoringError {
    /// Returns true for failure classes worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_) | Self::Unavailable(_))
    }

    /// Short label used in metrics and fallback reasons.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Unavailable(_) => "service_unavailable",
            Self::Rejected(_) => "rejected",
            Self::CircuitOpen(_) => "circuit_open",
        }
    }
}

impl From<ScoringError> for GameError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Timeout => GameError::Transient {
                kind: TransientKind::Timeout,
                message: "scoring call timed out".to_owned(),
            },
            ScoringError::Network(message) => GameError::Transient {
                kind: TransientKind::Network,
                message,
            },
            ScoringError::Unavailable(message) => GameError::Transient {
                kind: TransientKind::ServiceUnavailable,
                message,
            },
            ScoringError::Rejected(msg) => GameError::Validation(msg),
            ScoringError::CircuitOpen(name) => GameError::CircuitOpen(name),
        }
    }
}

/// The external scoring service.
#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Scores one response. Implementations need not enforce a timeout.
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreCard, ScoringError>;
}

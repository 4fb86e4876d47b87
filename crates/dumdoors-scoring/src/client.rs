//! The resilient scoring client.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use dumdoors_core::config::ConfigHandle;
use dumdoors_core::model::{ScoreSource, SubScores};
use dumdoors_core::rng::SharedRng;
use dumdoors_core::scoring::{ScoreCard, ScoreRequest, ScoringError, ScoringService};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::breaker::{BreakerRegistry, CircuitBreaker};
use crate::metrics::{CallOutcome, ScoringCallRecord, ScoringMetricsSink};
use crate::retry::RetryPolicy;

/// Default breaker name for the external scoring service.
pub const SCORING_DEPENDENCY: &str = "scoring-service";

/// Why a fallback score was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Every attempt timed out.
    Timeout,
    /// Every attempt hit a network failure.
    Network,
    /// The service reported itself unavailable.
    ServiceUnavailable,
    /// The service rejected the request.
    Rejected,
    /// The breaker short-circuited the call.
    CircuitOpen,
    /// The round's scoring budget ran out first.
    RoundBudget,
    /// The scoring task failed unexpectedly.
    Aborted,
}

impl FallbackReason {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Rejected => "rejected",
            Self::CircuitOpen => "circuit_open",
            Self::RoundBudget => "round_budget",
            Self::Aborted => "aborted",
        }
    }

    fn from_error(error: &ScoringError) -> Self {
        match error {
            ScoringError::Timeout => Self::Timeout,
            ScoringError::Network(_) => Self::Network,
            ScoringError::Unavailable(_) => Self::ServiceUnavailable,
            ScoringError::Rejected(_) => Self::Rejected,
            ScoringError::CircuitOpen(_) => Self::CircuitOpen,
        }
    }
}

/// Result of a resilient scoring call. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// The service scored the response.
    Scored(ScoreCard),
    /// A deterministic substitute.
    Fallback {
        card: ScoreCard,
        reason: FallbackReason,
    },
}

impl ScoreOutcome {
    /// A fallback with `score` applied to the total and every sub-score.
    #[must_use]
    pub fn fallback(score: u8, reason: FallbackReason) -> Self {
        Self::Fallback {
            card: ScoreCard {
                score,
                sub_scores: SubScores::uniform(score),
            },
            reason,
        }
    }

    /// The score card, real or substituted.
    #[must_use]
    pub fn card(&self) -> ScoreCard {
        match self {
            Self::Scored(card) | Self::Fallback { card, .. } => *card,
        }
    }

    /// Where the score came from.
    #[must_use]
    pub fn source(&self) -> ScoreSource {
        match self {
            Self::Scored(_) => ScoreSource::Service,
            Self::Fallback { .. } => ScoreSource::Fallback,
        }
    }
}

/// Scoring client with timeout, retry, circuit breaking and fallback.
///
/// Configuration is read from the [`ConfigHandle`] on every call, so retry,
/// timeout and breaker changes apply to the next call.
#[derive(Clone)]
pub struct ResilientScoringClient {
    service: Arc<dyn ScoringService>,
    breakers: Arc<BreakerRegistry>,
    dependency: String,
    config: ConfigHandle,
    rng: SharedRng,
    metrics: Arc<dyn ScoringMetricsSink>,
}

impl ResilientScoringClient {
    /// Creates a client guarding `service` under the default dependency name.
    #[must_use]
    pub fn new(
        service: Arc<dyn ScoringService>,
        breakers: Arc<BreakerRegistry>,
        config: ConfigHandle,
        rng: SharedRng,
        metrics: Arc<dyn ScoringMetricsSink>,
    ) -> Self {
        Self {
            service,
            breakers,
            dependency: SCORING_DEPENDENCY.to_owned(),
            config,
            rng,
            metrics,
        }
    }

    fn breaker(&self) -> Arc<CircuitBreaker> {
        let config = self.config.current();
        let breaker = self
            .breakers
            .get_or_create(&self.dependency, &config.scoring.breaker);
        breaker.reconfigure(&config.scoring.breaker);
        breaker
    }

    /// The configured fallback outcome.
    #[must_use]
    pub fn fallback(&self, reason: FallbackReason) -> ScoreOutcome {
        ScoreOutcome::fallback(self.config.current().scoring.fallback_score, reason)
    }

    /// Scores with the configured per-call timeout.
    pub async fn score_with_default_timeout(&self, request: &ScoreRequest) -> ScoreOutcome {
        let timeout = self.config.current().scoring.call_timeout();
        self.score(request, timeout).await
    }

    /// Scores `request`, giving each attempt at most `timeout`.
    pub async fn score(&self, request: &ScoreRequest, timeout: Duration) -> ScoreOutcome {
        let started = Instant::now();
        let policy = RetryPolicy::new(self.config.current().scoring.retry.clone());
        let breaker = self.breaker();
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            let error = match self.attempt(&breaker, request, timeout).await {
                Ok(card) => break Ok(card),
                Err(error) => error,
            };
            if !policy.should_retry(&error, attempt) {
                break Err(error);
            }
            let delay = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                policy.delay(attempt, &mut *rng)
            };
            debug!(
                dependency = %self.dependency,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying scoring call"
            );
            tokio::time::sleep(delay).await;
        };

        let outcome = match result {
            Ok(card) => ScoreOutcome::Scored(card),
            Err(error) => {
                let reason = FallbackReason::from_error(&error);
                warn!(
                    dependency = %self.dependency,
                    session_id = %request.session_id,
                    player_id = %request.player_id,
                    attempts = attempt,
                    reason = reason.as_str(),
                    error = %error,
                    "scoring failed, using fallback score"
                );
                self.fallback(reason)
            }
        };

        let record = ScoringCallRecord {
            dependency: self.dependency.clone(),
            outcome: match outcome {
                ScoreOutcome::Scored(_) => CallOutcome::Success,
                ScoreOutcome::Fallback { .. } => CallOutcome::Fallback,
            },
            reason: match outcome {
                ScoreOutcome::Scored(_) => None,
                ScoreOutcome::Fallback { reason, .. } => Some(reason.as_str()),
            },
            attempts: attempt,
            latency: started.elapsed(),
            breaker_state: breaker.state(),
        };
        debug!(
            dependency = %record.dependency,
            outcome = record.outcome.as_str(),
            attempts = record.attempts,
            latency_ms = u64::try_from(record.latency.as_millis()).unwrap_or(u64::MAX),
            breaker_state = record.breaker_state.as_str(),
            "scoring call finished"
        );
        self.metrics.record(&record);
        outcome
    }

    async fn attempt(
        &self,
        breaker: &Arc<CircuitBreaker>,
        request: &ScoreRequest,
        timeout: Duration,
    ) -> Result<ScoreCard, ScoringError> {
        let Some(permit) = breaker.try_acquire() else {
            return Err(ScoringError::CircuitOpen(self.dependency.clone()));
        };
        let result = match tokio::time::timeout(timeout, self.service.score(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ScoringError::Timeout),
        };
        match &result {
            Ok(_) => permit.success(),
            // A rejected request says nothing about the dependency's health.
            Err(ScoringError::Rejected(_)) => permit.success(),
            Err(_) => permit.failure(),
        }
        result.map(|card| ScoreCard {
            score: card.score.min(dumdoors_core::model::MAX_SCORE),
            sub_scores: card.sub_scores.clamped(),
        })
    }
}

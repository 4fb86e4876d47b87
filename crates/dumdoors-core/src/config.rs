//! Hot-reloadable game configuration.
//!
//! [`GameConfig`] holds every tunable the orchestration core reads at its
//! decision points. It is shared through a [`ConfigHandle`]; readers take a
//! cheap `Arc` snapshot per decision, so replacing the configuration never
//! disturbs a round already in progress beyond the next decision it makes.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::model::{GameMode, MAX_SCORE};

/// Score thresholds separating the path bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Scores at or below this are `poor`.
    pub poor_max: u8,
    /// Scores at or above this are `excellent`.
    pub excellent_min: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            poor_max: 30,
            excellent_min: 70,
        }
    }
}

/// Path length bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub default_nodes: u32,
    pub shorter_factor: f64,
    pub longer_factor: f64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            min_nodes: 3,
            max_nodes: 10,
            default_nodes: 6,
            shorter_factor: 0.6,
            longer_factor: 1.4,
        }
    }
}

/// Round timing and response rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    pub response_timeout_secs: u64,
    pub max_response_chars: usize,
    pub no_response_score: u8,
    pub intermission_ms: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: 60,
            max_response_chars: 500,
            no_response_score: 0,
            intermission_ms: 3000,
        }
    }
}

impl RoundConfig {
    /// Length of the response collection window.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Pause between a completed round and the next door.
    #[must_use]
    pub fn intermission(&self) -> Duration {
        Duration::from_millis(self.intermission_ms)
    }
}

/// Retry policy for transient scoring failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing probes.
    pub cooldown_secs: u64,
    /// Concurrent probe calls allowed while half-open.
    pub half_open_max_probes: u32,
    /// Consecutive probe successes that close the breaker.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            half_open_max_probes: 3,
            success_threshold: 3,
        }
    }
}

impl BreakerConfig {
    /// Cooldown as a [`Duration`].
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Scoring client parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub call_timeout_ms: u64,
    pub round_budget_ms: u64,
    pub fallback_score: u8,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            round_budget_ms: 30_000,
            fallback_score: 50,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl ScoringConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Hard cap on a round's joined scoring phase.
    #[must_use]
    pub fn round_budget(&self) -> Duration {
        Duration::from_millis(self.round_budget_ms)
    }
}

/// How a multiplayer session decides it is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Every participating member walks their own path to the end.
    #[default]
    AllFinish,
    /// The session ends as soon as the first member finishes.
    RaceToFinish,
}

/// Membership rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_multiplayer_members: usize,
    pub min_multiplayer_members: usize,
    pub completion_policy: CompletionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_multiplayer_members: 8,
            min_multiplayer_members: 2,
            completion_policy: CompletionPolicy::AllFinish,
        }
    }
}

impl SessionConfig {
    /// Member cap for `mode`.
    #[must_use]
    pub fn capacity(&self, mode: GameMode) -> usize {
        match mode {
            GameMode::Multiplayer => self.max_multiplayer_members,
            GameMode::SinglePlayer => 1,
        }
    }

    /// Members needed to start a session in `mode`.
    #[must_use]
    pub fn minimum_to_start(&self, mode: GameMode) -> usize {
        match mode {
            GameMode::Multiplayer => self.min_multiplayer_members,
            GameMode::SinglePlayer => 1,
        }
    }
}

/// Live connection bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub grace_period_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 300,
            heartbeat_interval_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

impl ConnectionConfig {
    /// Reconnection grace window.
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.grace_period_secs).unwrap_or(i64::MAX))
    }

    /// Interval between protocol pings.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Interval between sweeper passes.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Global leaderboard parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub cache_ttl_secs: u64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl LeaderboardConfig {
    /// Applies the default and clamps to the maximum.
    #[must_use]
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

/// Every tunable of the orchestration core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub thresholds: ThresholdConfig,
    pub path: PathConfig,
    pub rounds: RoundConfig,
    pub scoring: ScoringConfig,
    pub sessions: SessionConfig,
    pub connections: ConnectionConfig,
    pub leaderboard: LeaderboardConfig,
}

impl GameConfig {
    /// Parses a YAML document. Missing sections keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` if the document does not parse or
    /// the resulting configuration is inconsistent.
    pub fn from_yaml_str(text: &str) -> Result<Self, GameError> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| GameError::Validation(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` describing the first violated rule.
    pub fn validate(&self) -> Result<(), GameError> {
        let fail = |msg: &str| Err(GameError::Validation(msg.to_owned()));

        let t = &self.thresholds;
        if t.poor_max > MAX_SCORE || t.excellent_min > MAX_SCORE {
            return fail("score thresholds must be within [0, 100]");
        }
        if t.poor_max >= t.excellent_min {
            return fail("poor_max must be below excellent_min");
        }

        let p = &self.path;
        if p.min_nodes == 0 || p.min_nodes >= p.max_nodes {
            return fail("path bounds require 0 < min_nodes < max_nodes");
        }
        if p.default_nodes < p.min_nodes || p.default_nodes > p.max_nodes {
            return fail("default_nodes must lie within [min_nodes, max_nodes]");
        }
        if !(p.shorter_factor > 0.0 && p.longer_factor > 0.0) {
            return fail("path factors must be positive");
        }

        if self.rounds.response_timeout_secs == 0 || self.rounds.max_response_chars == 0 {
            return fail("response timeout and length bound must be positive");
        }
        if self.rounds.no_response_score > MAX_SCORE || self.scoring.fallback_score > MAX_SCORE {
            return fail("fallback scores must be within [0, 100]");
        }

        let s = &self.scoring;
        if s.call_timeout_ms == 0 || s.round_budget_ms == 0 {
            return fail("scoring timeouts must be positive");
        }
        if s.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if s.retry.backoff_factor < 1.0 {
            return fail("retry.backoff_factor must be at least 1.0");
        }
        if s.breaker.failure_threshold == 0
            || s.breaker.success_threshold == 0
            || s.breaker.half_open_max_probes == 0
        {
            return fail("breaker thresholds must be positive");
        }

        let m = &self.sessions;
        if m.min_multiplayer_members == 0
            || m.min_multiplayer_members > m.max_multiplayer_members
        {
            return fail("min_multiplayer_members must lie within [1, max_multiplayer_members]");
        }

        if self.connections.heartbeat_interval_secs == 0 || self.connections.sweep_interval_secs == 0
        {
            return fail("connection intervals must be positive");
        }
        if self.leaderboard.max_limit == 0 {
            return fail("leaderboard.max_limit must be positive");
        }
        Ok(())
    }
}

/// Shared, swappable configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<GameConfig>>>,
}

impl ConfigHandle {
    /// Wraps an initial configuration.
    #[must_use]
    pub fn new(config: GameConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Snapshot of the configuration in force.
    #[must_use]
    pub fn current(&self) -> Arc<GameConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates and installs a new configuration.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` and keeps the old configuration if
    /// `config` is inconsistent.
    pub fn replace(&self, config: GameConfig) -> Result<Arc<GameConfig>, GameError> {
        config.validate()?;
        let config = Arc::new(config);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);
        Ok(config)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(GameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_document_keeps_defaults() {
        // Arrange
        let yaml = "thresholds:\n  poor_max: 25\nsessions:\n  completion_policy: race-to-finish\n";

        // Act
        let config = GameConfig::from_yaml_str(yaml).unwrap();

        // Assert
        assert_eq!(config.thresholds.poor_max, 25);
        assert_eq!(config.thresholds.excellent_min, 70);
        assert_eq!(
            config.sessions.completion_policy,
            CompletionPolicy::RaceToFinish
        );
        assert_eq!(config.path.default_nodes, 6);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = GameConfig::default();
        config.thresholds.poor_max = 80;

        let result = config.validate();

        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_default_outside_bounds() {
        let mut config = GameConfig::default();
        config.path.default_nodes = 12;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = GameConfig::default();
        config.scoring.retry.max_attempts = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replace_swaps_snapshot_and_keeps_old_on_error() {
        // Arrange
        let handle = ConfigHandle::default();
        let before = handle.current();
        let mut next = GameConfig::default();
        next.rounds.response_timeout_secs = 90;

        // Act
        handle.replace(next).unwrap();
        let mut bad = GameConfig::default();
        bad.path.min_nodes = 0;
        let rejected = handle.replace(bad);

        // Assert
        assert_eq!(before.rounds.response_timeout_secs, 60);
        assert_eq!(handle.current().rounds.response_timeout_secs, 90);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_capacity_by_mode() {
        let sessions = SessionConfig::default();
        assert_eq!(sessions.capacity(GameMode::Multiplayer), 8);
        assert_eq!(sessions.capacity(GameMode::SinglePlayer), 1);
        assert_eq!(sessions.minimum_to_start(GameMode::Multiplayer), 2);
        assert_eq!(sessions.minimum_to_start(GameMode::SinglePlayer), 1);
    }

    #[test]
    fn test_effective_limit_clamps() {
        let lb = LeaderboardConfig::default();
        assert_eq!(lb.effective_limit(None), 10);
        assert_eq!(lb.effective_limit(Some(500)), 100);
        assert_eq!(lb.effective_limit(Some(0)), 1);
    }
}

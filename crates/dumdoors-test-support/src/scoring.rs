//! Test scoring services: scripted `ScoringService` implementations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dumdoors_core::model::SubScores;
use dumdoors_core::scoring::{ScoreCard, ScoreRequest, ScoringError, ScoringService};
use uuid::Uuid;

fn card(score: u8) -> ScoreCard {
    ScoreCard {
        score,
        sub_scores: SubScores::uniform(score),
    }
}

/// Always returns the same score card.
#[derive(Debug)]
pub struct StaticScoringService {
    card: ScoreCard,
    calls: AtomicUsize,
}

impl StaticScoringService {
    /// Returns `score` for every dimension on every call.
    #[must_use]
    pub fn new(score: u8) -> Self {
        Self::with_card(card(score))
    }

    /// Returns `card` on every call.
    #[must_use]
    pub fn with_card(card: ScoreCard) -> Self {
        Self {
            card,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for StaticScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.card)
    }
}

/// Scores by player, falling back to a default for unknown players.
#[derive(Debug)]
pub struct ScriptedScoringService {
    by_player: HashMap<Uuid, u8>,
    default_score: u8,
    requests: Mutex<Vec<ScoreRequest>>,
}

impl ScriptedScoringService {
    /// Scores every player `default_score` until overridden.
    #[must_use]
    pub fn new(default_score: u8) -> Self {
        Self {
            by_player: HashMap::new(),
            default_score,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scores `player_id` with `score` on every call.
    #[must_use]
    pub fn for_player(mut self, player_id: Uuid, score: u8) -> Self {
        self.by_player.insert(player_id, score);
        self
    }

    /// Snapshot of every request received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn requests(&self) -> Vec<ScoreRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoringService for ScriptedScoringService {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        self.requests.lock().unwrap().push(request.clone());
        let score = self
            .by_player
            .get(&request.player_id)
            .copied()
            .unwrap_or(self.default_score);
        Ok(card(score))
    }
}

/// Fails every call with the configured error.
#[derive(Debug)]
pub struct FailingScoringService {
    error: ScoringError,
    calls: AtomicUsize,
}

impl FailingScoringService {
    /// Fails with `error` on every call.
    #[must_use]
    pub fn new(error: ScoringError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulates a dependency that cannot be reached at all.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::new(ScoringError::Network("connection refused".into()))
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for FailingScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Fails the first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct FlakyScoringService {
    failures: usize,
    error: ScoringError,
    card: ScoreCard,
    calls: AtomicUsize,
}

impl FlakyScoringService {
    /// Fails `failures` times with `error`, then returns `score`.
    #[must_use]
    pub fn new(failures: usize, error: ScoringError, score: u8) -> Self {
        Self {
            failures,
            error,
            card: card(score),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for FlakyScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.card)
        }
    }
}

/// Never answers. Only a caller-side timeout gets past it.
#[derive(Debug, Default)]
pub struct HangingScoringService {
    calls: AtomicUsize,
}

impl HangingScoringService {
    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for HangingScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Err(ScoringError::Timeout)
    }
}

/// Panics on every call.
#[derive(Debug)]
pub struct PanickingScoringService;

#[async_trait]
impl ScoringService for PanickingScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        panic!("scoring service exploded");
    }
}

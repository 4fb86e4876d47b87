//! Round engine collaborators: door selection and joined scoring.

use std::sync::Arc;
use std::time::Duration;

use dumdoors_core::error::GameError;
use dumdoors_core::model::{Difficulty, Door, DoorId, Member};
use dumdoors_core::scenario::{ScenarioQuery, ScenarioStore};
use dumdoors_core::scoring::ScoreRequest;
use dumdoors_scoring::{FallbackReason, ResilientScoringClient, ScoreOutcome};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::aggregates::PendingScore;

/// Picks doors from the scenario store and scores responses through the
/// resilient client.
#[derive(Clone)]
pub struct RoundEngine {
    scenarios: Arc<dyn ScenarioStore>,
    scoring: ResilientScoringClient,
}

impl RoundEngine {
    #[must_use]
    pub fn new(scenarios: Arc<dyn ScenarioStore>, scoring: ResilientScoringClient) -> Self {
        Self { scenarios, scoring }
    }

    /// Draws a door, relaxing difficulty and then theme until one matches.
    async fn draw(
        &self,
        theme: Option<&str>,
        difficulty: Difficulty,
        exclude: &[DoorId],
    ) -> Result<Option<Door>, GameError> {
        let mut attempts = vec![(theme, Some(difficulty)), (theme, None)];
        if theme.is_some() {
            attempts.push((None, None));
        }
        for (theme, difficulty) in attempts {
            let query = ScenarioQuery {
                theme: theme.map(str::to_owned),
                difficulty,
                exclude: exclude.to_vec(),
            };
            if let Some(door) = self.scenarios.get_random_scenario(&query).await? {
                return Ok(Some(door));
            }
            debug!(?theme, ?difficulty, "no door matched, relaxing filters");
        }
        Ok(None)
    }

    /// The shared first door: the session theme at easy difficulty.
    ///
    /// # Errors
    ///
    /// Propagates scenario store failures.
    pub async fn opening_door(&self, theme: Option<&str>) -> Result<Option<Door>, GameError> {
        self.draw(theme, Difficulty::Easy, &[]).await
    }

    /// The next door for `member`: the graph edge for their last answer if
    /// it leads somewhere new, otherwise a random unseen door for their band.
    ///
    /// # Errors
    ///
    /// Propagates scenario store failures.
    pub async fn next_door(
        &self,
        theme: Option<&str>,
        member: &Member,
        seen: &[DoorId],
    ) -> Result<Option<Door>, GameError> {
        if let Some((last_door, score)) = member
            .responses
            .last()
            .and_then(|r| Some((&r.door_id, r.score?)))
        {
            if let Some(next) = self.scenarios.leads_to(last_door, score).await? {
                if !seen.contains(&next) {
                    if let Some(door) = self.scenarios.get_scenario_by_id(&next).await? {
                        return Ok(Some(door));
                    }
                    warn!(door_id = %next, "door graph points at a missing door");
                }
            }
        }
        let difficulty = member
            .path
            .map_or(Difficulty::Medium, |p| p.band.door_difficulty());
        self.draw(theme, difficulty, seen).await
    }

    /// The configured fallback for `reason`.
    #[must_use]
    pub fn fallback(&self, reason: FallbackReason) -> ScoreOutcome {
        self.scoring.fallback(reason)
    }

    /// Scores every pending response concurrently and joins them before
    /// `budget` runs out. Calls still running at the budget, and calls that
    /// panicked, resolve to a fallback. Returns one outcome per player.
    pub async fn score_all(
        &self,
        session_id: Uuid,
        theme: Option<&str>,
        pending: Vec<PendingScore>,
        budget: Duration,
    ) -> Vec<(Uuid, ScoreOutcome)> {
        let deadline = Instant::now() + budget;
        let handles: Vec<_> = pending
            .into_iter()
            .map(|p| {
                let request = ScoreRequest {
                    session_id,
                    player_id: p.player_id,
                    scenario_id: p.door.door_id,
                    scenario: p.door.content,
                    response: p.content,
                    theme: theme.map(str::to_owned),
                };
                let client = self.scoring.clone();
                let handle =
                    tokio::spawn(async move { client.score_with_default_timeout(&request).await });
                (p.player_id, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (player_id, mut handle) in handles {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    warn!(%session_id, %player_id, error = %join_error, "scoring task failed");
                    self.fallback(FallbackReason::Aborted)
                }
                Err(_) => {
                    handle.abort();
                    warn!(%session_id, %player_id, "scoring exceeded the round budget");
                    self.fallback(FallbackReason::RoundBudget)
                }
            };
            outcomes.push((player_id, outcome));
        }
        outcomes
    }
}

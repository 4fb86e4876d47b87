//! Shared application state.

use std::sync::Arc;

use dumdoors_core::clock::SharedClock;
use dumdoors_core::config::ConfigHandle;
use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
use dumdoors_core::rng::SharedRng;
use dumdoors_core::scenario::ScenarioStore;
use dumdoors_core::scoring::ScoringService;
use dumdoors_progress::LeaderboardService;
use dumdoors_realtime::ConnectionRegistry;
use dumdoors_scoring::{BreakerRegistry, ResilientScoringClient, ScoringMetricsSink};
use dumdoors_session::{RoundEngine, SessionManager, SessionManagerDeps};

use crate::settings::ConfigSource;

/// Storage, scoring and determinism seams the server is assembled from.
pub struct Backends {
    pub sessions: Arc<dyn SessionRepository>,
    pub leaderboard: Arc<dyn LeaderboardRepository>,
    pub scenarios: Arc<dyn ScenarioStore>,
    pub scoring: Arc<dyn ScoringService>,
    pub metrics: Arc<dyn ScoringMetricsSink>,
    pub clock: SharedClock,
    pub rng: SharedRng,
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub leaderboard: Arc<LeaderboardService>,
    pub registry: Arc<ConnectionRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub config: ConfigHandle,
    pub config_source: Arc<ConfigSource>,
}

impl AppState {
    /// Wires the session manager and its collaborators.
    #[must_use]
    pub fn new(backends: Backends, config: ConfigHandle, config_source: ConfigSource) -> Self {
        let breakers = Arc::new(BreakerRegistry::new());
        let scoring = ResilientScoringClient::new(
            backends.scoring,
            Arc::clone(&breakers),
            config.clone(),
            Arc::clone(&backends.rng),
            backends.metrics,
        );
        let registry = Arc::new(ConnectionRegistry::new());
        let leaderboard = Arc::new(LeaderboardService::new(
            backends.leaderboard,
            Arc::clone(&backends.clock),
            config.clone(),
        ));
        let manager = SessionManager::new(SessionManagerDeps {
            sessions: backends.sessions,
            engine: RoundEngine::new(backends.scenarios, scoring),
            registry: Arc::clone(&registry),
            leaderboard: Arc::clone(&leaderboard),
            clock: backends.clock,
            config: config.clone(),
        });
        Self {
            manager,
            leaderboard,
            registry,
            breakers,
            config,
            config_source: Arc::new(config_source),
        }
    }
}

//! Route modules, one per surface.

pub mod admin;
pub mod health;
pub mod leaderboard;
pub mod sessions;
pub mod ws;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use dumdoors_core::clock::SharedClock;
    use dumdoors_core::config::ConfigHandle;
    use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
    use dumdoors_core::rng::SharedRng;
    use dumdoors_scoring::InMemoryScoringMetrics;
    use dumdoors_store::{
        DoorGraph, InMemoryLeaderboardRepository, InMemoryScenarioStore, InMemorySessionRepository,
    };
    use dumdoors_test_support::{FixedClock, MockRng, StaticScoringService};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::settings::ConfigSource;
    use crate::state::{AppState, Backends};

    pub fn app_state_with(
        sessions: Arc<dyn SessionRepository>,
        leaderboard: Arc<dyn LeaderboardRepository>,
    ) -> AppState {
        let clock: SharedClock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 4, 2, 18, 0, 0).unwrap(),
        ));
        let rng: SharedRng = Arc::new(Mutex::new(MockRng));
        let scenarios = InMemoryScenarioStore::new(DoorGraph::builtin().unwrap(), rng.clone());
        AppState::new(
            Backends {
                sessions,
                leaderboard,
                scenarios: Arc::new(scenarios),
                scoring: Arc::new(StaticScoringService::new(60)),
                metrics: Arc::new(InMemoryScoringMetrics::new()),
                clock,
                rng,
            },
            ConfigHandle::default(),
            ConfigSource::default(),
        )
    }

    pub fn test_app_state() -> AppState {
        app_state_with(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(InMemoryLeaderboardRepository::new()),
        )
    }

    /// Sends one request and decodes the JSON body, `Null` when empty.
    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

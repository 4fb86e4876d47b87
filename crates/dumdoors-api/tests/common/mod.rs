//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dumdoors_api::settings::ConfigSource;
use dumdoors_api::state::{AppState, Backends};
use dumdoors_core::clock::SharedClock;
use dumdoors_core::config::ConfigHandle;
use dumdoors_core::rng::DeterministicRng;
use dumdoors_scoring::InMemoryScoringMetrics;
use dumdoors_store::{
    DoorGraph, InMemoryLeaderboardRepository, InMemoryScenarioStore, InMemorySessionRepository,
};
use dumdoors_test_support::{FixedClock, MockRng, StaticScoringService};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> SharedClock {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 4, 2, 18, 0, 0).unwrap(),
    ))
}

/// Build the full app over in-memory stores and a scoring service that
/// always answers `score`. Uses the same router as `main.rs`.
pub fn build_test_app(score: u8) -> (Router, AppState) {
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
    let graph = DoorGraph::builtin().unwrap();
    let state = AppState::new(
        Backends {
            sessions: Arc::new(InMemorySessionRepository::new()),
            leaderboard: Arc::new(InMemoryLeaderboardRepository::new()),
            scenarios: Arc::new(InMemoryScenarioStore::new(graph, Arc::clone(&rng))),
            scoring: Arc::new(StaticScoringService::new(score)),
            metrics: Arc::new(InMemoryScoringMetrics::new()),
            clock: fixed_clock(),
            rng,
        },
        ConfigHandle::default(),
        ConfigSource::default(),
    );
    (dumdoors_api::app(state.clone()), state)
}

async fn read(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    read(app.clone(), request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    read(app.clone(), request).await
}

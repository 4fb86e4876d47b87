//! Liveness endpoint.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use dumdoors_scoring::BreakerState;
use serde::Serialize;

use crate::state::AppState;

const SERVICE: &str = "dumdoors-backend";

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Sessions currently cached by the session manager.
    pub live_sessions: usize,
    /// Scoring breakers not currently closed. Non-zero means scores are
    /// being served from the fallback.
    pub tripped_breakers: usize,
}

async fn report(State(state): State<AppState>) -> Json<HealthReport> {
    let tripped_breakers = state
        .breakers
        .stats()
        .iter()
        .filter(|b| b.state != BreakerState::Closed)
        .count();
    Json(HealthReport {
        status: "ok",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
        live_sessions: state.manager.live_sessions(),
        tripped_breakers,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(report))
}

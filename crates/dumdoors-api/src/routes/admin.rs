//! Operator routes: live configuration and circuit breaker state.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use dumdoors_core::config::GameConfig;
use dumdoors_scoring::BreakerStats;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// Installs `config` and pushes it to the components that cache settings.
fn apply(state: &AppState, config: GameConfig) -> Result<Arc<GameConfig>, ApiError> {
    let config = state.config.replace(config)?;
    state.breakers.reconfigure(&config.scoring.breaker);
    state.leaderboard.invalidate();
    Ok(config)
}

/// GET /config
async fn get_config(State(state): State<AppState>) -> Json<GameConfig> {
    Json(GameConfig::clone(&state.config.current()))
}

/// PUT /config
#[instrument(skip(state, config))]
async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<GameConfig>,
) -> Result<Json<GameConfig>, ApiError> {
    let config = apply(&state, config)?;
    info!("game configuration replaced");
    Ok(Json(GameConfig::clone(&config)))
}

/// POST /config/reload
#[instrument(skip(state))]
async fn reload_config(State(state): State<AppState>) -> Result<Json<GameConfig>, ApiError> {
    let loaded = state.config_source.load()?;
    let config = apply(&state, loaded)?;
    info!("game configuration reloaded");
    Ok(Json(GameConfig::clone(&config)))
}

/// GET /circuit-breakers
async fn circuit_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStats>> {
    Json(state.breakers.stats())
}

/// Returns the router for admin routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/config/reload", post(reload_config))
        .route("/circuit-breakers", get(circuit_breakers))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::routes::fixtures::{send, test_app_state};

    #[tokio::test]
    async fn test_get_config_returns_defaults() {
        let app = router().with_state(test_app_state());

        let (status, json) = send(&app, "GET", "/config", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scoring"]["fallback_score"], 50);
        assert_eq!(json["path"]["default_nodes"], 6);
        assert_eq!(json["sessions"]["completion_policy"], "all-finish");
    }

    #[tokio::test]
    async fn test_put_config_replaces_live_config() {
        // Arrange
        let state = test_app_state();
        let app = router().with_state(state.clone());
        let mut updated = GameConfig::default();
        updated.rounds.response_timeout_secs = 45;
        updated.scoring.fallback_score = 40;

        // Act
        let (status, json) = send(
            &app,
            "PUT",
            "/config",
            Some(serde_json::to_value(&updated).unwrap()),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rounds"]["response_timeout_secs"], 45);
        assert_eq!(state.config.current().scoring.fallback_score, 40);
    }

    #[tokio::test]
    async fn test_put_inconsistent_config_is_rejected_and_kept() {
        // Arrange
        let state = test_app_state();
        let app = router().with_state(state.clone());
        let mut broken = GameConfig::default();
        broken.thresholds.poor_max = 90;
        broken.thresholds.excellent_min = 40;

        // Act
        let (status, json) = send(
            &app,
            "PUT",
            "/config",
            Some(serde_json::to_value(&broken).unwrap()),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
        assert_eq!(*state.config.current(), GameConfig::default());
    }

    #[tokio::test]
    async fn test_reload_without_file_restores_defaults() {
        // Arrange
        let state = test_app_state();
        let mut changed = GameConfig::default();
        changed.rounds.response_timeout_secs = 15;
        state.config.replace(changed).unwrap();
        let app = router().with_state(state.clone());

        // Act
        let (status, _) = send(&app, "POST", "/config/reload", None).await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.config.current().rounds.response_timeout_secs,
            GameConfig::default().rounds.response_timeout_secs
        );
    }

    #[tokio::test]
    async fn test_circuit_breakers_listed() {
        let app = router().with_state(test_app_state());

        let (status, json) = send(&app, "GET", "/circuit-breakers", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json.is_array());
    }
}

//! Routes for the global leaderboard.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use dumdoors_core::error::GameError;
use dumdoors_core::model::GameMode;
use dumdoors_core::view::{
    GlobalLeaderboard, LeaderboardCategory, LeaderboardFilter, LeaderboardStats, PlayerRank,
    TimeRange,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_category(raw: &str) -> Result<LeaderboardCategory, GameError> {
    LeaderboardCategory::parse(raw)
        .ok_or_else(|| GameError::Validation(format!("unknown leaderboard category {raw:?}")))
}

/// Query string for the player rank lookup.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankQuery {
    pub category: Option<String>,
    pub mode: Option<GameMode>,
    pub theme: Option<String>,
    #[serde(default)]
    pub time_range: TimeRange,
}

/// GET /
async fn all_categories(
    State(state): State<AppState>,
    Query(filter): Query<LeaderboardFilter>,
) -> Result<Json<Vec<GlobalLeaderboard>>, ApiError> {
    Ok(Json(state.leaderboard.all_categories(&filter).await?))
}

/// GET /stats
async fn stats(
    State(state): State<AppState>,
    Query(filter): Query<LeaderboardFilter>,
) -> Result<Json<LeaderboardStats>, ApiError> {
    Ok(Json(state.leaderboard.stats(&filter).await?))
}

/// GET /{category}
async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(filter): Query<LeaderboardFilter>,
) -> Result<Json<GlobalLeaderboard>, ApiError> {
    let category = parse_category(&category)?;
    Ok(Json(
        state.leaderboard.global_leaderboard(category, &filter).await?,
    ))
}

/// GET /players/{player_id}/rank
async fn player_rank(
    State(state): State<AppState>,
    Path(player_id): Path<Uuid>,
    Query(query): Query<RankQuery>,
) -> Result<Json<PlayerRank>, ApiError> {
    let category = match query.category.as_deref() {
        Some(raw) => parse_category(raw)?,
        None => LeaderboardCategory::HighestAverage,
    };
    let filter = LeaderboardFilter {
        mode: query.mode,
        theme: query.theme,
        time_range: query.time_range,
        limit: None,
    };
    Ok(Json(
        state
            .leaderboard
            .player_rank(player_id, category, &filter)
            .await?,
    ))
}

/// Returns the router for leaderboard routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(all_categories))
        .route("/stats", get(stats))
        .route("/{category}", get(by_category))
        .route("/players/{player_id}/rank", get(player_rank))
}

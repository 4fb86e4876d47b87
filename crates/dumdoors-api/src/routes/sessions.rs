//! Routes for session lifecycle, responses and per-session views.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dumdoors_core::model::{GameMode, Response, SessionRecord};
use dumdoors_core::view::{ConnectionQuality, PlayerRanking, SessionProgress};
use dumdoors_session::domain::commands::{
    CreateSession, JoinSession, LeaveSession, StartGame, SubmitResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

fn default_mode() -> GameMode {
    GameMode::Multiplayer
}

/// Request body for POST /.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// The creator, who joins immediately.
    pub player_id: Uuid,
    pub username: String,
    #[serde(default = "default_mode")]
    pub mode: GameMode,
    pub theme: Option<String>,
    /// Reference into the external identity provider.
    #[serde(default)]
    pub identity_ref: Option<String>,
}

/// Request body for POST /{session_id}/join.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub player_id: Uuid,
    pub username: String,
    #[serde(default)]
    pub identity_ref: Option<String>,
}

/// Request body for POST /{session_id}/leave.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveSessionRequest {
    pub player_id: Uuid,
}

/// Request body for POST /{session_id}/responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    pub player_id: Uuid,
    pub content: String,
}

/// One live connection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    pub player_id: Uuid,
    pub quality: Option<ConnectionQuality>,
}

/// Response body for GET /{session_id}/connections.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsResponse {
    pub session_id: Uuid,
    pub active_connections: usize,
    pub players: Vec<ConnectionView>,
}

/// POST /
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionRecord>), ApiError> {
    let command = CreateSession {
        correlation_id: Uuid::new_v4(),
        mode: request.mode,
        creator_id: request.player_id,
        username: request.username,
        theme: request.theme,
        identity_ref: request.identity_ref,
    };

    info!(correlation_id = %command.correlation_id, "handling create_session command");

    let record = state.manager.create_session(command).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /{session_id}
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionRecord>, ApiError> {
    Ok(Json(state.manager.get_session(session_id).await?))
}

/// POST /{session_id}/join
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
async fn join_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<JoinSessionRequest>,
) -> Result<Json<SessionRecord>, ApiError> {
    let command = JoinSession {
        correlation_id: Uuid::new_v4(),
        session_id,
        player_id: request.player_id,
        username: request.username,
        identity_ref: request.identity_ref,
    };

    info!(correlation_id = %command.correlation_id, "handling join_session command");

    Ok(Json(state.manager.join_session(command).await?))
}

/// POST /{session_id}/leave
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
async fn leave_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<LeaveSessionRequest>,
) -> Result<Json<SessionRecord>, ApiError> {
    let command = LeaveSession {
        correlation_id: Uuid::new_v4(),
        session_id,
        player_id: request.player_id,
    };

    info!(correlation_id = %command.correlation_id, "handling leave_session command");

    Ok(Json(state.manager.leave_session(command).await?))
}

/// POST /{session_id}/start
#[instrument(skip(state))]
async fn start_game(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionRecord>, ApiError> {
    let command = StartGame {
        correlation_id: Uuid::new_v4(),
        session_id,
    };

    info!(correlation_id = %command.correlation_id, "handling start_game command");

    Ok(Json(state.manager.start_game(command).await?))
}

/// POST /{session_id}/responses
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
async fn submit_response(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SubmitResponseRequest>,
) -> Result<Json<Response>, ApiError> {
    let command = SubmitResponse {
        correlation_id: Uuid::new_v4(),
        session_id,
        player_id: request.player_id,
        content: request.content,
    };

    info!(correlation_id = %command.correlation_id, "handling submit_response command");

    Ok(Json(state.manager.submit_response(command).await?))
}

/// GET /{session_id}/progress
async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionProgress>, ApiError> {
    Ok(Json(state.manager.progress(session_id).await?))
}

/// GET /{session_id}/rankings
async fn rankings(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<PlayerRanking>>, ApiError> {
    Ok(Json(state.manager.rankings(session_id).await?))
}

/// GET /{session_id}/connections
async fn connections(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    // 404 for unknown sessions.
    state.manager.get_session(session_id).await?;
    let mut players: Vec<ConnectionView> = state
        .registry
        .active_connections(session_id)
        .into_iter()
        .map(|player_id| ConnectionView {
            player_id,
            quality: state.registry.connection_quality(session_id, player_id),
        })
        .collect();
    players.sort_by_key(|c| c.player_id);
    Ok(Json(ConnectionsResponse {
        session_id,
        active_connections: players.len(),
        players,
    }))
}

/// Returns the router for session routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/{session_id}", get(get_session))
        .route("/{session_id}/join", post(join_session))
        .route("/{session_id}/leave", post(leave_session))
        .route("/{session_id}/start", post(start_game))
        .route("/{session_id}/responses", post(submit_response))
        .route("/{session_id}/progress", get(progress))
        .route("/{session_id}/rankings", get(rankings))
        .route("/{session_id}/connections", get(connections))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dumdoors_store::InMemoryLeaderboardRepository;
    use dumdoors_test_support::FailingSessionRepository;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::routes::fixtures::{app_state_with, send, test_app_state};

    async fn create(app: &Router, player_id: Uuid) -> String {
        let (status, json) = send(
            app,
            "POST",
            "/",
            Some(json!({ "playerId": player_id, "username": "ada", "theme": "workplace" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["sessionId"].as_str().unwrap().to_owned()
    }

    async fn join(app: &Router, session_id: &str, player_id: Uuid) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            &format!("/{session_id}/join"),
            Some(json!({ "playerId": player_id, "username": "bo" })),
        )
        .await
    }

    #[tokio::test]
    async fn test_create_session_returns_201_with_creator_as_member() {
        // Arrange
        let app = router().with_state(test_app_state());
        let player_id = Uuid::new_v4();

        // Act
        let (status, json) = send(
            &app,
            "POST",
            "/",
            Some(json!({ "playerId": player_id, "username": "ada" })),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["mode"], "multiplayer");
        assert_eq!(json["members"].as_array().unwrap().len(), 1);
        assert_eq!(json["creatorId"], player_id.to_string());
    }

    #[tokio::test]
    async fn test_create_and_join_store_identity_refs() {
        // Arrange
        let app = router().with_state(test_app_state());
        let (ada, bo) = (Uuid::new_v4(), Uuid::new_v4());

        // Act
        let (_, created) = send(
            &app,
            "POST",
            "/",
            Some(json!({ "playerId": ada, "username": "ada", "identityRef": "auth0|ada" })),
        )
        .await;
        let session_id = created["sessionId"].as_str().unwrap();
        let (status, joined) = send(
            &app,
            "POST",
            &format!("/{session_id}/join"),
            Some(json!({ "playerId": bo, "username": "bo", "identityRef": "auth0|bo" })),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["members"][0]["identityRef"], "auth0|ada");
        assert_eq!(joined["members"][1]["identityRef"], "auth0|bo");
    }

    #[tokio::test]
    async fn test_create_session_returns_400_for_blank_username() {
        let app = router().with_state(test_app_state());

        let (status, json) = send(
            &app,
            "POST",
            "/",
            Some(json!({ "playerId": Uuid::new_v4(), "username": "  " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_create_session_returns_422_for_missing_fields() {
        let app = router().with_state(test_app_state());

        let (status, _) = send(&app, "POST", "/", Some(json!({}))).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_get_unknown_session_returns_404() {
        let app = router().with_state(test_app_state());

        let (status, json) = send(&app, "GET", &format!("/{}", Uuid::new_v4()), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_join_start_and_respond() {
        // Arrange
        let app = router().with_state(test_app_state());
        let (ada, bo) = (Uuid::new_v4(), Uuid::new_v4());
        let session_id = create(&app, ada).await;

        // Act
        let (join_status, _) = join(&app, &session_id, bo).await;
        let (start_status, started) =
            send(&app, "POST", &format!("/{session_id}/start"), None).await;
        let (answer_status, answer) = send(
            &app,
            "POST",
            &format!("/{session_id}/responses"),
            Some(json!({ "playerId": ada, "content": "I volunteer and set the scope" })),
        )
        .await;
        let (again_status, again) = send(
            &app,
            "POST",
            &format!("/{session_id}/responses"),
            Some(json!({ "playerId": ada, "content": "second try" })),
        )
        .await;
        let (_, progress) = send(&app, "GET", &format!("/{session_id}/progress"), None).await;

        // Assert
        assert_eq!(join_status, StatusCode::OK);
        assert_eq!(start_status, StatusCode::OK);
        assert_eq!(started["status"], "active");
        assert_eq!(started["doorLog"].as_array().unwrap().len(), 1);
        assert_eq!(answer_status, StatusCode::OK);
        assert_eq!(answer["roundIndex"], 1);
        assert_eq!(again_status, StatusCode::CONFLICT);
        assert_eq!(again["error"], "conflict");
        assert_eq!(progress["currentRound"], 1);
        assert_eq!(progress["members"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_join_after_start_returns_409() {
        let app = router().with_state(test_app_state());
        let session_id = create(&app, Uuid::new_v4()).await;
        join(&app, &session_id, Uuid::new_v4()).await;
        send(&app, "POST", &format!("/{session_id}/start"), None).await;

        let (status, json) = join(&app, &session_id, Uuid::new_v4()).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "conflict");
    }

    #[tokio::test]
    async fn test_start_with_one_member_returns_409() {
        let app = router().with_state(test_app_state());
        let session_id = create(&app, Uuid::new_v4()).await;

        let (status, json) = send(&app, "POST", &format!("/{session_id}/start"), None).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "invalid_state");
    }

    #[tokio::test]
    async fn test_empty_response_returns_400() {
        let app = router().with_state(test_app_state());
        let ada = Uuid::new_v4();
        let session_id = create(&app, ada).await;
        join(&app, &session_id, Uuid::new_v4()).await;
        send(&app, "POST", &format!("/{session_id}/start"), None).await;

        let (status, json) = send(
            &app,
            "POST",
            &format!("/{session_id}/responses"),
            Some(json!({ "playerId": ada, "content": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_leave_while_waiting_removes_member() {
        // Arrange
        let app = router().with_state(test_app_state());
        let bo = Uuid::new_v4();
        let session_id = create(&app, Uuid::new_v4()).await;
        join(&app, &session_id, bo).await;

        // Act
        let (status, json) = send(
            &app,
            "POST",
            &format!("/{session_id}/leave"),
            Some(json!({ "playerId": bo })),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["members"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rankings_list_every_member() {
        let app = router().with_state(test_app_state());
        let session_id = create(&app, Uuid::new_v4()).await;
        join(&app, &session_id, Uuid::new_v4()).await;

        let (status, json) = send(&app, "GET", &format!("/{session_id}/rankings"), None).await;

        assert_eq!(status, StatusCode::OK);
        let rankings = json.as_array().unwrap();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0]["rank"], 1);
    }

    #[tokio::test]
    async fn test_connections_report_live_channels() {
        // Arrange
        let state = test_app_state();
        let app = router().with_state(state.clone());
        let ada = Uuid::new_v4();
        let session_id = create(&app, ada).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .manager
            .connect(session_id.parse().unwrap(), ada, tx)
            .await
            .unwrap();

        // Act
        let (status, json) = send(&app, "GET", &format!("/{session_id}/connections"), None).await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["activeConnections"], 1);
        assert_eq!(json["players"][0]["playerId"], ada.to_string());
        assert_eq!(json["players"][0]["quality"], "good");
    }

    #[tokio::test]
    async fn test_create_session_returns_500_when_store_fails() {
        let state = app_state_with(
            Arc::new(FailingSessionRepository),
            Arc::new(InMemoryLeaderboardRepository::new()),
        );
        let app = router().with_state(state);

        let (status, json) = send(
            &app,
            "POST",
            "/",
            Some(json!({ "playerId": Uuid::new_v4(), "username": "ada" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "infrastructure_error");
    }
}

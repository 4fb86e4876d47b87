//! The realtime channel: one WebSocket per (session, player).
//!
//! Server events are forwarded from the player's registry channel as JSON
//! text frames. Clients may answer the open door with
//! `{"type": "submit-response", "data": {"content": "..."}}` and may send
//! `{"type": "ping"}` as an application-level heartbeat reply.

use axum::Json;
use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use dumdoors_core::error::GameError;
use dumdoors_core::event::ServerEvent;
use dumdoors_session::domain::commands::SubmitResponse;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Query string identifying the connecting player.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub session_id: Uuid,
    pub player_id: Uuid,
}

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
enum ClientMessage {
    SubmitResponse { content: String },
    Ping,
}

/// GET /ws?sessionId=..&playerId=..
///
/// Membership is checked before the upgrade so that unknown sessions and
/// strangers get a plain HTTP error.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match state
        .manager
        .validate_player_join(params.session_id, params.player_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            let body = ErrorBody {
                error: "forbidden",
                message: format!(
                    "player {} is not a member of session {}",
                    params.player_id, params.session_id
                ),
            };
            return (StatusCode::FORBIDDEN, Json(body)).into_response();
        }
        Err(err) => return ApiError(err).into_response(),
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| {
                handle_socket(socket, state, params.session_id, params.player_id)
            })
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize server event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: Uuid, player_id: Uuid) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registration = match state.manager.connect(session_id, player_id, tx).await {
        Ok(registration) => registration,
        Err(err) => {
            let _ = send_event(&mut socket, &state.manager.error_event(session_id, &err)).await;
            return;
        }
    };
    let generation = registration.generation;
    info!(%session_id, %player_id, generation, kind = ?registration.kind, "websocket connected");

    let period = state.config.current().connections.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if !send_event(&mut socket, &event).await {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_client_message(&state, session_id, player_id, generation, &text)
                                .await
                        {
                            if !send_event(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.heartbeat_acknowledged(session_id, player_id, generation);
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                state.registry.heartbeat_sent(session_id, player_id, generation);
                if socket.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.manager.disconnect(session_id, player_id, generation).await;
    info!(%session_id, %player_id, generation, "websocket closed");
}

/// Applies one client frame; returns an error event to send back, if any.
async fn handle_client_message(
    state: &AppState,
    session_id: Uuid,
    player_id: Uuid,
    generation: u64,
    text: &str,
) -> Option<ServerEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            let err = GameError::Validation(format!("malformed message: {err}"));
            return Some(state.manager.error_event(session_id, &err));
        }
    };
    debug!(?message, "client message");

    match message {
        ClientMessage::SubmitResponse { content } => {
            let command = SubmitResponse {
                correlation_id: Uuid::new_v4(),
                session_id,
                player_id,
                content,
            };
            state
                .manager
                .submit_response(command)
                .await
                .err()
                .map(|err| state.manager.error_event(session_id, &err))
        }
        ClientMessage::Ping => {
            state
                .registry
                .heartbeat_acknowledged(session_id, player_id, generation);
            None
        }
    }
}

/// Returns the router for the realtime channel.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

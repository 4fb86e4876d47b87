//! DumDoors API server.
//!
//! HTTP routes and the `/api/v1/ws` realtime channel, all backed
//! by one [`SessionManager`](dumdoors_session::SessionManager).

pub mod error;
pub mod routes;
pub mod settings;
pub mod state;
pub mod telemetry;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router with every route mounted.
pub fn app(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/sessions", routes::sessions::router())
        .nest("/api/v1/leaderboard", routes::leaderboard::router())
        .nest("/api/v1/admin", routes::admin::router())
        .nest("/api/v1", routes::ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

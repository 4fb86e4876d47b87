//! DumDoors API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use dumdoors_api::settings::{ConfigSource, Settings};
use dumdoors_api::state::{AppState, Backends};
use dumdoors_api::telemetry;
use dumdoors_core::clock::SystemClock;
use dumdoors_core::config::ConfigHandle;
use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
use dumdoors_core::rng::StdRngSource;
use dumdoors_scoring::{HttpScoringService, OtelScoringMetrics};
use dumdoors_store::{
    DoorGraph, InMemoryLeaderboardRepository, InMemoryScenarioStore, InMemorySessionRepository,
    PgLeaderboardRepository, PgSessionRepository, schema,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;
    let telemetry = telemetry::init(settings.otlp_endpoint.as_deref())?;

    tracing::info!("Starting DumDoors API server");

    let config_source = ConfigSource::new(settings.config_path.clone());
    let config = ConfigHandle::new(config_source.load()?);

    // Without DATABASE_URL everything lives in memory.
    let sessions: Arc<dyn SessionRepository>;
    let leaderboard: Arc<dyn LeaderboardRepository>;
    if let Some(database_url) = &settings.database_url {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        schema::ensure_schema(&pool).await?;
        sessions = Arc::new(PgSessionRepository::new(pool.clone()));
        leaderboard = Arc::new(PgLeaderboardRepository::new(pool));
    } else {
        tracing::warn!("DATABASE_URL not set, using in-memory stores");
        sessions = Arc::new(InMemorySessionRepository::new());
        leaderboard = Arc::new(InMemoryLeaderboardRepository::new());
    }

    let graph = match &settings.scenario_catalog {
        Some(path) => DoorGraph::from_path(path)?,
        None => DoorGraph::builtin()?,
    };
    let rng = StdRngSource::from_os().shared();

    let app_state = AppState::new(
        Backends {
            sessions,
            leaderboard,
            scenarios: Arc::new(InMemoryScenarioStore::new(graph, Arc::clone(&rng))),
            scoring: Arc::new(HttpScoringService::new(settings.scoring_service_url.clone())),
            metrics: Arc::new(OtelScoringMetrics::new()),
            clock: Arc::new(SystemClock),
            rng,
        },
        config,
        config_source,
    );
    tokio::spawn(Arc::clone(&app_state.manager).run_sweeper());

    let app = dumdoors_api::app(app_state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .map_err(|e| format!("invalid HOST:PORT combination: {e}"))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    telemetry.shutdown();
    Ok(())
}

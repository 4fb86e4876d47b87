//! `PostgreSQL` implementations of the session and leaderboard repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dumdoors_core::error::GameError;
use dumdoors_core::model::{GameMode, LeaderboardEntry, SessionRecord};
use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
use dumdoors_core::view::EntryQuery;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

fn infrastructure(err: &sqlx::Error) -> GameError {
    GameError::Infrastructure(format!("database error: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// PostgreSQL-backed session document store.
#[derive(Debug, Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Creates a new `PgSessionRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionRecord>, GameError> {
        let row: Option<(Json<SessionRecord>,)> =
            sqlx::query_as("SELECT document FROM game_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| infrastructure(&e))?;
        Ok(row.map(|(Json(record),)| record))
    }

    async fn save(&self, record: &SessionRecord, expected_version: i64) -> Result<(), GameError> {
        let query = if expected_version == 0 {
            sqlx::query(
                "INSERT INTO game_sessions (session_id, mode, status, version, document) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (session_id) DO NOTHING",
            )
            .bind(record.session_id)
            .bind(record.mode.as_str())
            .bind(record.status.as_str())
            .bind(record.version)
            .bind(Json(record))
        } else {
            sqlx::query(
                "UPDATE game_sessions \
                 SET status = $2, version = $3, document = $4, updated_at = NOW() \
                 WHERE session_id = $1 AND version = $5",
            )
            .bind(record.session_id)
            .bind(record.status.as_str())
            .bind(record.version)
            .bind(Json(record))
            .bind(expected_version)
        };
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;

        if result.rows_affected() == 0 {
            return Err(GameError::Conflict(format!(
                "session {} was modified concurrently (expected version {expected_version})",
                record.session_id
            )));
        }
        debug!(session_id = %record.session_id, version = record.version, "saved session");
        Ok(())
    }
}

/// PostgreSQL-backed leaderboard entry store.
#[derive(Debug, Clone)]
pub struct PgLeaderboardRepository {
    pool: PgPool,
}

impl PgLeaderboardRepository {
    /// Creates a new `PgLeaderboardRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_i32(value: u32, column: &str) -> Result<i32, GameError> {
    i32::try_from(value).map_err(|_| GameError::Validation(format!("{column} out of range")))
}

fn entry_from_row(row: &PgRow) -> Result<LeaderboardEntry, sqlx::Error> {
    let mode: String = row.try_get("mode")?;
    let total_score: i32 = row.try_get("total_score")?;
    let doors_completed: i32 = row.try_get("doors_completed")?;
    let completed_at: DateTime<Utc> = row.try_get("completed_at")?;
    Ok(LeaderboardEntry {
        entry_id: row.try_get("entry_id")?,
        session_id: row.try_get("session_id")?,
        player_id: row.try_get("player_id")?,
        username: row.try_get("username")?,
        mode: GameMode::parse(&mode).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "mode".into(),
            source: format!("unknown game mode {mode}").into(),
        })?,
        theme: row.try_get("theme")?,
        total_score: u32::try_from(total_score).unwrap_or(0),
        average_score: row.try_get("average_score")?,
        doors_completed: u32::try_from(doors_completed).unwrap_or(0),
        finished: row.try_get("finished")?,
        completion_time_secs: row.try_get("completion_time_secs")?,
        completed_at,
    })
}

#[async_trait]
impl LeaderboardRepository for PgLeaderboardRepository {
    async fn append(&self, entries: &[LeaderboardEntry]) -> Result<(), GameError> {
        let mut tx = self.pool.begin().await.map_err(|e| infrastructure(&e))?;
        for entry in entries {
            let inserted = sqlx::query(
                "INSERT INTO leaderboard_entries (entry_id, session_id, player_id, username, mode, \
                 theme, total_score, average_score, doors_completed, finished, \
                 completion_time_secs, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(entry.entry_id)
            .bind(entry.session_id)
            .bind(entry.player_id)
            .bind(&entry.username)
            .bind(entry.mode.as_str())
            .bind(entry.theme.as_deref())
            .bind(to_i32(entry.total_score, "total_score")?)
            .bind(entry.average_score)
            .bind(to_i32(entry.doors_completed, "doors_completed")?)
            .bind(entry.finished)
            .bind(entry.completion_time_secs)
            .bind(entry.completed_at)
            .execute(&mut *tx)
            .await;
            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    return Err(GameError::Conflict(format!(
                        "leaderboard entry for player {} in session {} already exists",
                        entry.player_id, entry.session_id
                    )));
                }
                return Err(infrastructure(&err));
            }
        }
        tx.commit().await.map_err(|e| infrastructure(&e))?;
        Ok(())
    }

    async fn query(&self, query: &EntryQuery) -> Result<Vec<LeaderboardEntry>, GameError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM leaderboard_entries WHERE TRUE");
        if let Some(mode) = query.mode {
            builder.push(" AND mode = ").push_bind(mode.as_str());
        }
        if let Some(theme) = &query.theme {
            builder.push(" AND theme = ").push_bind(theme.clone());
        }
        if let Some(since) = query.completed_since {
            builder.push(" AND completed_at >= ").push_bind(since);
        }
        builder.push(" ORDER BY seq");
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| infrastructure(&e))?;
        rows.iter()
            .map(entry_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| infrastructure(&e))
    }

    async fn has_entries_for_session(&self, session_id: Uuid) -> Result<bool, GameError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM leaderboard_entries WHERE session_id = $1)",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| infrastructure(&e))?;
        Ok(exists)
    }
}

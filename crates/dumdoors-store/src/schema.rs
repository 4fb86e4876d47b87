//! Database schema for session documents and leaderboard entries.

use sqlx::PgPool;

/// SQL to create the sessions table.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS game_sessions (
    session_id  UUID PRIMARY KEY,
    mode        VARCHAR(32) NOT NULL,
    status      VARCHAR(32) NOT NULL,
    version     BIGINT NOT NULL,
    document    JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_game_sessions_status
    ON game_sessions (status);
";

/// SQL to create the leaderboard table.
pub const CREATE_LEADERBOARD_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS leaderboard_entries (
    seq                  BIGSERIAL PRIMARY KEY,
    entry_id             UUID NOT NULL UNIQUE,
    session_id           UUID NOT NULL,
    player_id            UUID NOT NULL,
    username             VARCHAR(255) NOT NULL,
    mode                 VARCHAR(32) NOT NULL,
    theme                VARCHAR(255),
    total_score          INTEGER NOT NULL,
    average_score        DOUBLE PRECISION NOT NULL,
    doors_completed      INTEGER NOT NULL,
    finished             BOOLEAN NOT NULL,
    completion_time_secs BIGINT,
    completed_at         TIMESTAMPTZ NOT NULL,
    UNIQUE (session_id, player_id)
);

CREATE INDEX IF NOT EXISTS idx_leaderboard_entries_completed_at
    ON leaderboard_entries (completed_at);

CREATE INDEX IF NOT EXISTS idx_leaderboard_entries_player_id
    ON leaderboard_entries (player_id);
";

/// Creates both tables if they do not exist.
///
/// # Errors
///
/// Returns the database error if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(CREATE_SESSIONS_TABLE).execute(pool).await?;
    sqlx::raw_sql(CREATE_LEADERBOARD_TABLE).execute(pool).await?;
    Ok(())
}

//! Persistence abstractions for sessions and leaderboard entries.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GameError;
use crate::model::{LeaderboardEntry, SessionRecord};
use crate::view::EntryQuery;

/// Document store for session records keyed by session id.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Loads a session record, or `None` if it was never saved.
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionRecord>, GameError>;

    /// Saves a session record with optimistic concurrency.
    ///
    /// `expected_version` is the version the caller last loaded (0 for a new
    /// record). The stored version must match, otherwise `GameError::Conflict`
    /// is returned and nothing is written.
    async fn save(&self, record: &SessionRecord, expected_version: i64) -> Result<(), GameError>;
}

/// Append-only store of leaderboard entries.
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    /// Appends entries atomically.
    ///
    /// Returns `GameError::Conflict` without writing anything if an entry for
    /// the same `(session_id, player_id)` already exists.
    async fn append(&self, entries: &[LeaderboardEntry]) -> Result<(), GameError>;

    /// Returns every entry matching `query`, in insertion order.
    async fn query(&self, query: &EntryQuery) -> Result<Vec<LeaderboardEntry>, GameError>;

    /// Returns true if entries were already written for `session_id`.
    async fn has_entries_for_session(&self, session_id: Uuid) -> Result<bool, GameError>;
}

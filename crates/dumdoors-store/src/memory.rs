//! In-memory repositories.

use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dumdoors_core::error::GameError;
use dumdoors_core::model::{LeaderboardEntry, SessionRecord};
use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
use dumdoors_core::view::EntryQuery;
use uuid::Uuid;

fn version_conflict(session_id: Uuid, expected: i64, actual: i64) -> GameError {
    GameError::Conflict(format!(
        "session {session_id} is at version {actual}, expected {expected}"
    ))
}

/// Session documents held in a concurrent map.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    records: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionRecord>, GameError> {
        Ok(self.records.get(&session_id).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &SessionRecord, expected_version: i64) -> Result<(), GameError> {
        match self.records.entry(record.session_id) {
            Entry::Occupied(mut slot) => {
                let actual = slot.get().version;
                if actual != expected_version {
                    return Err(version_conflict(record.session_id, expected_version, actual));
                }
                slot.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                if expected_version != 0 {
                    return Err(version_conflict(record.session_id, expected_version, 0));
                }
                slot.insert(record.clone());
            }
        }
        Ok(())
    }
}

/// Append-only leaderboard held in a vector.
#[derive(Debug, Default)]
pub struct InMemoryLeaderboardRepository {
    entries: RwLock<Vec<LeaderboardEntry>>,
}

impl InMemoryLeaderboardRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> GameError {
    GameError::Infrastructure("leaderboard store lock poisoned".into())
}

#[async_trait]
impl LeaderboardRepository for InMemoryLeaderboardRepository {
    async fn append(&self, entries: &[LeaderboardEntry]) -> Result<(), GameError> {
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        for (i, entry) in entries.iter().enumerate() {
            let key = (entry.session_id, entry.player_id);
            let duplicate = stored
                .iter()
                .chain(&entries[..i])
                .any(|e| (e.session_id, e.player_id) == key);
            if duplicate {
                return Err(GameError::Conflict(format!(
                    "leaderboard entry for player {} in session {} already exists",
                    entry.player_id, entry.session_id
                )));
            }
        }
        stored.extend_from_slice(entries);
        Ok(())
    }

    async fn query(&self, query: &EntryQuery) -> Result<Vec<LeaderboardEntry>, GameError> {
        let stored = self.entries.read().map_err(|_| poisoned())?;
        Ok(stored.iter().filter(|e| query.matches(e)).cloned().collect())
    }

    async fn has_entries_for_session(&self, session_id: Uuid) -> Result<bool, GameError> {
        let stored = self.entries.read().map_err(|_| poisoned())?;
        Ok(stored.iter().any(|e| e.session_id == session_id))
    }
}

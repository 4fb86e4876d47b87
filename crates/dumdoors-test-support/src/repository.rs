//! Test repositories: failing store implementations for error paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dumdoors_core::error::GameError;
use dumdoors_core::model::{LeaderboardEntry, SessionRecord};
use dumdoors_core::repository::{LeaderboardRepository, SessionRepository};
use dumdoors_core::view::EntryQuery;
use uuid::Uuid;

/// A session repository that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingSessionRepository;

#[async_trait]
impl SessionRepository for FailingSessionRepository {
    async fn load(&self, _session_id: Uuid) -> Result<Option<SessionRecord>, GameError> {
        Err(GameError::Infrastructure("connection refused".into()))
    }

    async fn save(&self, _record: &SessionRecord, _expected_version: i64) -> Result<(), GameError> {
        Err(GameError::Infrastructure("connection refused".into()))
    }
}

/// A leaderboard repository that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingLeaderboardRepository;

#[async_trait]
impl LeaderboardRepository for FailingLeaderboardRepository {
    async fn append(&self, _entries: &[LeaderboardEntry]) -> Result<(), GameError> {
        Err(GameError::Infrastructure("connection refused".into()))
    }

    async fn query(&self, _query: &EntryQuery) -> Result<Vec<LeaderboardEntry>, GameError> {
        Err(GameError::Infrastructure("connection refused".into()))
    }

    async fn has_entries_for_session(&self, _session_id: Uuid) -> Result<bool, GameError> {
        Err(GameError::Infrastructure("connection refused".into()))
    }
}

fn outage() -> GameError {
    GameError::Infrastructure("connection refused".into())
}

/// Wraps a session repository with an outage switch.
pub struct SwitchableSessionRepository {
    inner: Arc<dyn SessionRepository>,
    available: AtomicBool,
}

impl SwitchableSessionRepository {
    #[must_use]
    pub fn new(inner: Arc<dyn SessionRepository>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every call fails with an infrastructure error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GameError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(outage())
        }
    }
}

#[async_trait]
impl SessionRepository for SwitchableSessionRepository {
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionRecord>, GameError> {
        self.check()?;
        self.inner.load(session_id).await
    }

    async fn save(&self, record: &SessionRecord, expected_version: i64) -> Result<(), GameError> {
        self.check()?;
        self.inner.save(record, expected_version).await
    }
}

/// Wraps a leaderboard repository with an outage switch.
pub struct SwitchableLeaderboardRepository {
    inner: Arc<dyn LeaderboardRepository>,
    available: AtomicBool,
}

impl SwitchableLeaderboardRepository {
    #[must_use]
    pub fn new(inner: Arc<dyn LeaderboardRepository>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every call fails with an infrastructure error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GameError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(outage())
        }
    }
}

#[async_trait]
impl LeaderboardRepository for SwitchableLeaderboardRepository {
    async fn append(&self, entries: &[LeaderboardEntry]) -> Result<(), GameError> {
        self.check()?;
        self.inner.append(entries).await
    }

    async fn query(&self, query: &EntryQuery) -> Result<Vec<LeaderboardEntry>, GameError> {
        self.check()?;
        self.inner.query(query).await
    }

    async fn has_entries_for_session(&self, session_id: Uuid) -> Result<bool, GameError> {
        self.check()?;
        self.inner.has_entries_for_session(session_id).await
    }
}

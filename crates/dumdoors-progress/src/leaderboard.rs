//! Global leaderboard: pure sorts over the entry set plus a TTL cache.
//!
//! The cache only saves work. Every write bumps a generation counter and
//! clears the cache; a cached board is served only while both its generation
//! and its age are current, and anything else triggers a full recompute from
//! the repository.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dumdoors_core::clock::SharedClock;
use dumdoors_core::config::ConfigHandle;
use dumdoors_core::error::GameError;
use dumdoors_core::model::{LeaderboardEntry, SessionRecord, SessionStatus};
use dumdoors_core::repository::LeaderboardRepository;
use dumdoors_core::view::{
    EntryQuery, GlobalLeaderboard, LeaderboardCategory, LeaderboardFilter, LeaderboardStats,
    MostActivePlayer, PlayerRank, RankedEntry,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ranking::leaderboard_entries;

fn stable_tail(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    a.session_id
        .cmp(&b.session_id)
        .then_with(|| a.player_id.cmp(&b.player_id))
}

fn category_order(category: LeaderboardCategory, a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    let primary = match category {
        LeaderboardCategory::Fastest => a.completion_time_secs.cmp(&b.completion_time_secs),
        LeaderboardCategory::HighestAverage => b.average_score.total_cmp(&a.average_score),
        LeaderboardCategory::MostCompleted => b.doors_completed.cmp(&a.doors_completed),
        LeaderboardCategory::Recent => b.completed_at.cmp(&a.completed_at),
    };
    let by_time = if category == LeaderboardCategory::Recent {
        Ordering::Equal
    } else {
        a.completed_at.cmp(&b.completed_at)
    };
    primary.then(by_time).then_with(|| stable_tail(a, b))
}

fn eligible(category: LeaderboardCategory, entry: &LeaderboardEntry) -> bool {
    match category {
        LeaderboardCategory::Fastest => entry.finished && entry.completion_time_secs.is_some(),
        _ => true,
    }
}

/// Ranks `entries` for `category`, keeping the first `limit`.
///
/// Returns the ranked rows and the number of eligible entries before the
/// limit was applied. The order is total, so the same input always yields the
/// same output.
#[must_use]
pub fn rank_entries(
    entries: &[LeaderboardEntry],
    category: LeaderboardCategory,
    limit: usize,
) -> (Vec<RankedEntry>, usize) {
    let mut candidates: Vec<&LeaderboardEntry> =
        entries.iter().filter(|e| eligible(category, e)).collect();
    candidates.sort_by(|a, b| category_order(category, a, b));
    let total = candidates.len();
    let ranked = candidates
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, entry)| RankedEntry {
            rank: i + 1,
            entry: entry.clone(),
        })
        .collect();
    (ranked, total)
}

fn compute_stats(entries: &[LeaderboardEntry]) -> LeaderboardStats {
    let times: Vec<i64> = entries
        .iter()
        .filter(|e| e.finished)
        .filter_map(|e| e.completion_time_secs)
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let average_completion_time_secs =
        (!times.is_empty()).then(|| times.iter().sum::<i64>() as f64 / times.len() as f64);

    let mut per_player: HashMap<Uuid, (usize, &LeaderboardEntry)> = HashMap::new();
    for entry in entries {
        let slot = per_player.entry(entry.player_id).or_insert((0, entry));
        slot.0 += 1;
        if entry.completed_at >= slot.1.completed_at {
            slot.1 = entry;
        }
    }
    let most_active_player = per_player
        .into_iter()
        .max_by(|(id_a, (count_a, _)), (id_b, (count_b, _))| {
            count_a.cmp(count_b).then_with(|| id_b.cmp(id_a))
        })
        .map(|(player_id, (sessions, latest))| MostActivePlayer {
            player_id,
            username: latest.username.clone(),
            sessions,
        });

    LeaderboardStats {
        total_entries: entries.len(),
        average_completion_time_secs,
        fastest_completion_time_secs: times.iter().copied().min(),
        highest_average_score: entries
            .iter()
            .map(|e| e.average_score)
            .max_by(f64::total_cmp),
        most_active_player,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    category: LeaderboardCategory,
    filter: LeaderboardFilter,
}

#[derive(Debug, Clone)]
struct CachedBoard {
    board: GlobalLeaderboard,
    cached_at: DateTime<Utc>,
    generation: u64,
}

/// Writes leaderboard entries and serves global leaderboard queries.
pub struct LeaderboardService {
    repository: Arc<dyn LeaderboardRepository>,
    clock: SharedClock,
    config: ConfigHandle,
    cache: DashMap<CacheKey, CachedBoard>,
    generation: AtomicU64,
}

impl LeaderboardService {
    /// Creates a service over `repository`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn LeaderboardRepository>,
        clock: SharedClock,
        config: ConfigHandle,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Writes one entry per member of a completed session, exactly once.
    ///
    /// Returns the entries written, or an empty list if the session was
    /// already recorded.
    ///
    /// # Errors
    ///
    /// Returns `GameError::InvalidState` if the session has not completed,
    /// or a repository error.
    pub async fn record_session(
        &self,
        record: &SessionRecord,
    ) -> Result<Vec<LeaderboardEntry>, GameError> {
        if record.status != SessionStatus::Completed {
            return Err(GameError::InvalidState(format!(
                "session {} has not completed",
                record.session_id
            )));
        }
        if self
            .repository
            .has_entries_for_session(record.session_id)
            .await?
        {
            debug!(session_id = %record.session_id, "leaderboard entries already recorded");
            return Ok(Vec::new());
        }
        let entries = leaderboard_entries(record, self.clock.now());
        match self.repository.append(&entries).await {
            Ok(()) => {}
            Err(GameError::Conflict(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        self.invalidate();
        info!(
            session_id = %record.session_id,
            entries = entries.len(),
            "leaderboard entries recorded"
        );
        Ok(entries)
    }

    /// Drops every cached board.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        self.cache.clear();
    }

    fn normalize(&self, filter: &LeaderboardFilter) -> LeaderboardFilter {
        let config = self.config.current();
        LeaderboardFilter {
            limit: Some(config.leaderboard.effective_limit(filter.limit)),
            ..filter.clone()
        }
    }

    fn entry_query(&self, filter: &LeaderboardFilter) -> EntryQuery {
        EntryQuery {
            mode: filter.mode,
            theme: filter.theme.clone(),
            completed_since: filter.time_range.since(self.clock.now()),
        }
    }

    /// One category of the global leaderboard.
    ///
    /// # Errors
    ///
    /// Returns a repository error on a cache miss that cannot be recomputed.
    pub async fn global_leaderboard(
        &self,
        category: LeaderboardCategory,
        filter: &LeaderboardFilter,
    ) -> Result<GlobalLeaderboard, GameError> {
        let filter = self.normalize(filter);
        let key = CacheKey {
            category,
            filter: filter.clone(),
        };
        let generation = self.generation.load(AtomicOrdering::SeqCst);
        let ttl = Duration::seconds(
            i64::try_from(self.config.current().leaderboard.cache_ttl_secs).unwrap_or(i64::MAX),
        );
        let now = self.clock.now();

        if let Some(cached) = self.cache.get(&key) {
            if cached.generation == generation && now - cached.cached_at < ttl {
                return Ok(cached.board.clone());
            }
        }

        let entries = self.repository.query(&self.entry_query(&filter)).await?;
        let (ranked, total_entries) =
            rank_entries(&entries, category, filter.limit.unwrap_or(usize::MAX));
        let board = GlobalLeaderboard {
            category,
            entries: ranked,
            total_entries,
        };
        if self.generation.load(AtomicOrdering::SeqCst) == generation {
            self.cache.insert(
                key,
                CachedBoard {
                    board: board.clone(),
                    cached_at: now,
                    generation,
                },
            );
        }
        Ok(board)
    }

    /// Every category for the same filter.
    ///
    /// # Errors
    ///
    /// Returns a repository error.
    pub async fn all_categories(
        &self,
        filter: &LeaderboardFilter,
    ) -> Result<Vec<GlobalLeaderboard>, GameError> {
        let mut boards = Vec::with_capacity(LeaderboardCategory::ALL.len());
        for category in LeaderboardCategory::ALL {
            boards.push(self.global_leaderboard(category, filter).await?);
        }
        Ok(boards)
    }

    /// Aggregate statistics over the filtered entry set.
    ///
    /// # Errors
    ///
    /// Returns a repository error.
    pub async fn stats(&self, filter: &LeaderboardFilter) -> Result<LeaderboardStats, GameError> {
        let entries = self.repository.query(&self.entry_query(filter)).await?;
        Ok(compute_stats(&entries))
    }

    /// The player's best position in `category`, ignoring the limit.
    ///
    /// # Errors
    ///
    /// Returns a repository error.
    pub async fn player_rank(
        &self,
        player_id: Uuid,
        category: LeaderboardCategory,
        filter: &LeaderboardFilter,
    ) -> Result<PlayerRank, GameError> {
        let entries = self.repository.query(&self.entry_query(filter)).await?;
        let (ranked, total_ranked) = rank_entries(&entries, category, usize::MAX);
        let rank = ranked
            .iter()
            .find(|r| r.entry.player_id == player_id)
            .map(|r| r.rank);
        Ok(PlayerRank {
            player_id,
            category,
            rank,
            total_ranked,
        })
    }
}

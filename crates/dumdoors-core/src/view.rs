//! Read-side views derived from session state and leaderboard entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{GameMode, LeaderboardEntry, PathBand, SessionStatus};

/// Per-member slice of a [`SessionProgress`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProgress {
    pub player_id: Uuid,
    pub username: String,
    pub current_position: u32,
    pub total_score: u32,
    pub average_score: f64,
    pub completion_percentage: f64,
    pub remaining_doors: u32,
    pub path_band: Option<PathBand>,
    pub is_active: bool,
    pub is_finished: bool,
    pub finalized: bool,
}

/// Snapshot of where every member of a session stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub current_round: u32,
    pub overall_completion: f64,
    pub members: Vec<PlayerProgress>,
}

/// A row of the in-session leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStanding {
    pub rank: usize,
    pub player_id: Uuid,
    pub username: String,
    pub completion_percentage: f64,
    pub average_score: f64,
    pub total_score: u32,
}

/// Mean of each sub-score dimension over a member's scored responses.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScoreAverages {
    pub creativity: f64,
    pub feasibility: f64,
    pub humor: f64,
    pub originality: f64,
}

/// Performance statistics for one member of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_score: u32,
    pub average_score: f64,
    pub highest_score: Option<u8>,
    pub lowest_score: Option<u8>,
    pub responses_scored: usize,
    pub average_response_time_ms: Option<f64>,
    pub sub_score_averages: SubScoreAverages,
    pub path_efficiency: f64,
    pub completion_percentage: f64,
    pub completion_time_secs: Option<i64>,
}

/// Final placement of a member once a session completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRanking {
    pub rank: usize,
    pub player_id: Uuid,
    pub username: String,
    pub finished: bool,
    pub completed_round: Option<u32>,
    pub doors_completed: u32,
    pub stats: PerformanceStats,
}

/// Link health derived from heartbeat replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionQuality {
    /// Every heartbeat answered.
    Good,
    /// One or two heartbeats unanswered.
    Degraded,
    /// Three or more heartbeats unanswered.
    Poor,
}

impl ConnectionQuality {
    /// Quality for a number of consecutive missed heartbeats.
    #[must_use]
    pub fn from_missed(missed: u32) -> Self {
        match missed {
            0 => Self::Good,
            1 | 2 => Self::Degraded,
            _ => Self::Poor,
        }
    }
}

/// Global leaderboard ranking categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderboardCategory {
    /// Shortest completion time, finished paths only.
    Fastest,
    /// Highest average score.
    HighestAverage,
    /// Most doors completed.
    MostCompleted,
    /// Newest completions first.
    Recent,
}

impl LeaderboardCategory {
    /// Every category, in display order.
    pub const ALL: [Self; 4] = [
        Self::Fastest,
        Self::HighestAverage,
        Self::MostCompleted,
        Self::Recent,
    ];

    /// Parses a path or query value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fastest" => Some(Self::Fastest),
            "highest-average" | "highest_avg" | "highest_average" => Some(Self::HighestAverage),
            "most-completed" | "most_completed" => Some(Self::MostCompleted),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }
}

/// Age window for leaderboard queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    #[default]
    All,
}

impl TimeRange {
    /// Earliest completion time included, relative to `now`.
    #[must_use]
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Day => Some(now - Duration::days(1)),
            Self::Week => Some(now - Duration::weeks(1)),
            Self::Month => Some(now - Duration::days(30)),
            Self::All => None,
        }
    }
}

/// Caller-facing leaderboard filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardFilter {
    pub mode: Option<GameMode>,
    pub theme: Option<String>,
    #[serde(default)]
    pub time_range: TimeRange,
    pub limit: Option<usize>,
}

/// Storage-level entry selection, with the time range already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryQuery {
    pub mode: Option<GameMode>,
    pub theme: Option<String>,
    pub completed_since: Option<DateTime<Utc>>,
}

impl EntryQuery {
    /// Returns true if `entry` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, entry: &LeaderboardEntry) -> bool {
        self.mode.is_none_or(|mode| entry.mode == mode)
            && self
                .theme
                .as_deref()
                .is_none_or(|theme| entry.theme.as_deref() == Some(theme))
            && self
                .completed_since
                .is_none_or(|since| entry.completed_at >= since)
    }
}

/// A leaderboard entry with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: usize,
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
}

/// One category of the global leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLeaderboard {
    pub category: LeaderboardCategory,
    pub entries: Vec<RankedEntry>,
    pub total_entries: usize,
}

/// The player with the most leaderboard entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MostActivePlayer {
    pub player_id: Uuid,
    pub username: String,
    pub sessions: usize,
}

/// Aggregate statistics over the leaderboard entry set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardStats {
    pub total_entries: usize,
    pub average_completion_time_secs: Option<f64>,
    pub fastest_completion_time_secs: Option<i64>,
    pub highest_average_score: Option<f64>,
    pub most_active_player: Option<MostActivePlayer>,
}

/// A player's best placement in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRank {
    pub player_id: Uuid,
    pub category: LeaderboardCategory,
    pub rank: Option<usize>,
    pub total_ranked: usize,
}

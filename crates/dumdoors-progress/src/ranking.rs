//! Final rankings, performance statistics and leaderboard entry snapshots.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use dumdoors_core::model::{LeaderboardEntry, Member, SessionRecord};
use dumdoors_core::view::{PerformanceStats, PlayerRanking, SubScoreAverages};
use uuid::Uuid;

/// Path length at which efficiency bottoms out.
const EFFICIENCY_WORST_NODES: f64 = 15.0;
/// Path length at which efficiency peaks.
const EFFICIENCY_BEST_NODES: f64 = 5.0;

/// `(15 − nodes) / (15 − 5) × 100`, clamped to `[0, 100]`.
#[must_use]
pub fn path_efficiency(node_count: u32) -> f64 {
    let raw = (EFFICIENCY_WORST_NODES - f64::from(node_count))
        / (EFFICIENCY_WORST_NODES - EFFICIENCY_BEST_NODES)
        * 100.0;
    raw.clamp(0.0, 100.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / f64::from(count))
}

fn completion_time_secs(member: &Member, started_at: Option<DateTime<Utc>>) -> Option<i64> {
    let (start, end) = (started_at?, member.completed_at?);
    Some((end - start).num_seconds().max(0))
}

/// Statistics for one member. `started_at` is the session start.
#[must_use]
pub fn performance_stats(member: &Member, started_at: Option<DateTime<Utc>>) -> PerformanceStats {
    let scored: Vec<_> = member
        .responses
        .iter()
        .filter_map(|r| Some((r.score?, r.sub_scores?)))
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let average_response_time_ms = mean(
        member
            .responses
            .iter()
            .filter_map(|r| r.response_time_ms)
            .map(|ms| ms as f64),
    );
    let dim = |pick: fn(&dumdoors_core::model::SubScores) -> u8| {
        mean(scored.iter().map(|(_, s)| f64::from(pick(s)))).unwrap_or(0.0)
    };
    PerformanceStats {
        total_score: member.total_score,
        average_score: member.average_score(),
        highest_score: scored.iter().map(|(s, _)| *s).max(),
        lowest_score: scored.iter().map(|(s, _)| *s).min(),
        responses_scored: scored.len(),
        average_response_time_ms,
        sub_score_averages: SubScoreAverages {
            creativity: dim(|s| s.creativity),
            feasibility: dim(|s| s.feasibility),
            humor: dim(|s| s.humor),
            originality: dim(|s| s.originality),
        },
        path_efficiency: path_efficiency(member.node_count),
        completion_percentage: member.completion_percentage(),
        completion_time_secs: completion_time_secs(member, started_at),
    }
}

fn placement(a: &Member, b: &Member) -> Ordering {
    let by_progress = match (a.is_finished(), b.is_finished()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a
            .completed_round
            .cmp(&b.completed_round)
            .then_with(|| a.completed_at.cmp(&b.completed_at)),
        (false, false) => b
            .completion_percentage()
            .total_cmp(&a.completion_percentage()),
    };
    by_progress
        .then_with(|| b.total_score.cmp(&a.total_score))
        .then_with(|| a.joined_at.cmp(&b.joined_at))
}

/// Final placements: finished members by finishing round and time, then
/// unfinished members by completion. Ties go to the higher total score,
/// then the earlier joiner.
#[must_use]
pub fn final_rankings(record: &SessionRecord) -> Vec<PlayerRanking> {
    let mut members: Vec<&Member> = record.members.iter().collect();
    members.sort_by(|a, b| placement(a, b));
    members
        .into_iter()
        .enumerate()
        .map(|(i, m)| PlayerRanking {
            rank: i + 1,
            player_id: m.player_id,
            username: m.username.clone(),
            finished: m.is_finished(),
            completed_round: m.completed_round,
            doors_completed: m.current_position,
            stats: performance_stats(m, record.started_at),
        })
        .collect()
}

/// One frozen entry per member of a completed session.
#[must_use]
pub fn leaderboard_entries(record: &SessionRecord, now: DateTime<Utc>) -> Vec<LeaderboardEntry> {
    let completed_at = record.completed_at.unwrap_or(now);
    record
        .members
        .iter()
        .map(|m| LeaderboardEntry {
            entry_id: Uuid::now_v7(),
            session_id: record.session_id,
            player_id: m.player_id,
            username: m.username.clone(),
            mode: record.mode,
            theme: record.theme.clone(),
            total_score: m.total_score,
            average_score: m.average_score(),
            doors_completed: m.current_position,
            finished: m.is_finished(),
            completion_time_secs: completion_time_secs(m, record.started_at),
            completed_at,
        })
        .collect()
}

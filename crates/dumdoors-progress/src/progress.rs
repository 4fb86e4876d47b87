//! In-session progress snapshots and standings.

use dumdoors_core::model::{Member, SessionRecord};
use dumdoors_core::view::{PlayerProgress, PlayerStanding, SessionProgress};

fn player_progress(member: &Member) -> PlayerProgress {
    PlayerProgress {
        player_id: member.player_id,
        username: member.username.clone(),
        current_position: member.current_position,
        total_score: member.total_score,
        average_score: member.average_score(),
        completion_percentage: member.completion_percentage(),
        remaining_doors: if member.is_finished() {
            0
        } else {
            member.remaining_doors()
        },
        path_band: member.path.map(|p| p.band),
        is_active: member.is_active,
        is_finished: member.is_finished(),
        finalized: member.finalized,
    }
}

/// Snapshot of every member's position, score and completion.
#[must_use]
pub fn session_progress(record: &SessionRecord) -> SessionProgress {
    let members: Vec<PlayerProgress> = record.members.iter().map(player_progress).collect();
    #[allow(clippy::cast_precision_loss)]
    let overall_completion = if members.is_empty() {
        0.0
    } else {
        members.iter().map(|m| m.completion_percentage).sum::<f64>() / members.len() as f64
    };
    SessionProgress {
        session_id: record.session_id,
        status: record.status,
        current_round: record.current_round_index(),
        overall_completion,
        members,
    }
}

/// The in-session leaderboard: completion first, then average score.
#[must_use]
pub fn standings(record: &SessionRecord) -> Vec<PlayerStanding> {
    let mut members: Vec<&Member> = record.members.iter().collect();
    members.sort_by(|a, b| {
        b.completion_percentage()
            .total_cmp(&a.completion_percentage())
            .then_with(|| b.average_score().total_cmp(&a.average_score()))
            .then_with(|| b.total_score.cmp(&a.total_score))
            .then_with(|| a.joined_at.cmp(&b.joined_at))
    });
    members
        .into_iter()
        .enumerate()
        .map(|(i, m)| PlayerStanding {
            rank: i + 1,
            player_id: m.player_id,
            username: m.username.clone(),
            completion_percentage: m.completion_percentage(),
            average_score: m.average_score(),
            total_score: m.total_score,
        })
        .collect()
}

//! Progress & Leaderboard Aggregator.
//!
//! Everything here reads session state and never mutates it. Per-session
//! views ([`progress`]) and end-of-game placements ([`ranking`]) are pure
//! functions of a [`SessionRecord`](dumdoors_core::model::SessionRecord);
//! the cross-session [`leaderboard`] sorts an append-only entry set.

pub mod leaderboard;
pub mod progress;
pub mod ranking;

pub use leaderboard::{LeaderboardService, rank_entries};
pub use progress::{session_progress, standings};
pub use ranking::{final_rankings, leaderboard_entries, path_efficiency, performance_stats};

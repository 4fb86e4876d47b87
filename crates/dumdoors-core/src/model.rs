//! Session, member, door and response records.
//!
//! These are the persisted shapes. Mutation rules (who may change what and
//! when) are enforced by the session aggregate; the few invariants that can
//! be checked locally, such as a response being scored only once, live here.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;

/// Highest score the scoring service can award.
pub const MAX_SCORE: u8 = 100;

/// Identifier of a door in the scenario catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoorId(pub String);

impl DoorId {
    /// Creates a door id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DoorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a session is shared or solo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameMode {
    /// Several players progress through synchronized rounds.
    Multiplayer,
    /// A single player.
    SinglePlayer,
}

impl GameMode {
    /// Stable string form used in storage and query strings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multiplayer => "multiplayer",
            Self::SinglePlayer => "single-player",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "multiplayer" => Some(Self::Multiplayer),
            "single-player" | "single_player" | "singleplayer" => Some(Self::SinglePlayer),
            _ => None,
        }
    }
}

/// Lifecycle status of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Accepting members, no round has been presented.
    Waiting,
    /// Rounds are in progress.
    Active,
    /// Terminal.
    Completed,
}

impl SessionStatus {
    /// Stable string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Returns true if moving from `self` to `next` is a forward step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Active) | (Self::Active, Self::Completed)
        )
    }
}

/// Difficulty of a door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    /// Gentle scenario.
    Easy,
    /// Standard scenario.
    Medium,
    /// Demanding scenario.
    Hard,
}

impl Difficulty {
    /// Stable string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

/// A scenario presented to players. Immutable once presented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Door {
    /// Catalog identifier.
    pub door_id: DoorId,
    /// Scenario text.
    pub content: String,
    /// Theme tag (e.g. "workplace").
    pub theme: String,
    /// Difficulty level.
    pub difficulty: Difficulty,
    /// Tags describing acceptable solution shapes.
    #[serde(default)]
    pub expected_tags: Vec<String>,
}

/// Per-dimension sub-scores, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScores {
    /// Novelty of approach.
    pub creativity: u8,
    /// How workable the response is.
    pub feasibility: u8,
    /// Entertainment value.
    pub humor: u8,
    /// Distance from the obvious answer.
    pub originality: u8,
}

impl SubScores {
    /// All four dimensions set to `value`.
    #[must_use]
    pub fn uniform(value: u8) -> Self {
        let value = value.min(MAX_SCORE);
        Self {
            creativity: value,
            feasibility: value,
            humor: value,
            originality: value,
        }
    }

    /// Integer average of the four dimensions.
    #[must_use]
    pub fn average(&self) -> u8 {
        let sum = u16::from(self.creativity)
            + u16::from(self.feasibility)
            + u16::from(self.humor)
            + u16::from(self.originality);
        // Sum of four u8 values over four always fits in a u8.
        u8::try_from(sum / 4).unwrap_or(MAX_SCORE)
    }

    /// Returns a copy with every dimension clamped to `[0, 100]`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            creativity: self.creativity.min(MAX_SCORE),
            feasibility: self.feasibility.min(MAX_SCORE),
            humor: self.humor.min(MAX_SCORE),
            originality: self.originality.min(MAX_SCORE),
        }
    }
}

/// Where a recorded score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreSource {
    /// Returned by the external scoring service.
    Service,
    /// Substituted after the scoring service failed or was short-circuited.
    Fallback,
    /// Assigned to a member who did not respond before the deadline.
    NoResponse,
}

/// A player's answer to a door.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Unique identifier.
    pub response_id: Uuid,
    /// Door being answered.
    pub door_id: DoorId,
    /// Author.
    pub player_id: Uuid,
    /// Round the response belongs to.
    pub round_index: u32,
    /// Free text, possibly empty for a synthetic no-response entry.
    pub content: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Milliseconds between presentation and submission.
    pub response_time_ms: Option<i64>,
    /// Total score, set exactly once.
    pub score: Option<u8>,
    /// Sub-scores, set together with `score`.
    pub sub_scores: Option<SubScores>,
    /// Origin of the score.
    pub score_source: Option<ScoreSource>,
}

impl Response {
    /// Returns true once a score has been recorded.
    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }

    /// Records the score fields.
    ///
    /// # Errors
    ///
    /// Returns `GameError::InvalidState` if the response was already scored.
    pub fn record_score(
        &mut self,
        score: u8,
        sub_scores: SubScores,
        source: ScoreSource,
    ) -> Result<(), GameError> {
        if self.is_scored() {
            return Err(GameError::InvalidState(format!(
                "response {} is already scored",
                self.response_id
            )));
        }
        self.score = Some(score.min(MAX_SCORE));
        self.sub_scores = Some(sub_scores.clamped());
        self.score_source = Some(source);
        Ok(())
    }
}

/// Difficulty band derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathBand {
    /// Score at or below the poor threshold.
    Poor,
    /// Between the thresholds.
    Average,
    /// Score at or above the excellent threshold.
    Excellent,
}

impl PathBand {
    /// Difficulty of doors drawn for a member in this band.
    #[must_use]
    pub fn door_difficulty(self) -> Difficulty {
        match self {
            Self::Excellent => Difficulty::Easy,
            Self::Average => Difficulty::Medium,
            Self::Poor => Difficulty::Hard,
        }
    }
}

/// Relative path length chosen for a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathLength {
    /// More remaining doors.
    Longer,
    /// The default number of doors.
    Medium,
    /// Fewer remaining doors.
    Shorter,
}

/// Derived routing decision for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecommendation {
    /// Band the score falls in.
    pub band: PathBand,
    /// Path length for the band.
    pub length: PathLength,
    /// Total doors on the path, clamped to the configured bounds.
    pub node_count: u32,
}

/// A participant in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub username: String,
    /// Reference into the external identity provider.
    pub identity_ref: Option<String>,
    /// Join time.
    pub joined_at: DateTime<Utc>,
    /// Doors completed. Never decreases.
    pub current_position: u32,
    /// Sum of all scored responses.
    pub total_score: u32,
    /// Responses in round order.
    pub responses: Vec<Response>,
    /// Connected, as opposed to inside the reconnection grace window.
    pub is_active: bool,
    /// Permanently inactive: left mid-game or missed the grace window.
    pub finalized: bool,
    /// When the live channel was lost, if it currently is.
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Latest path recommendation.
    pub path: Option<PathRecommendation>,
    /// Total doors on the member's path.
    pub node_count: u32,
    /// Round in which the member finished their path.
    pub completed_round: Option<u32>,
    /// When the member finished their path.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Member {
    /// A freshly joined member with a default-length path.
    #[must_use]
    pub fn new(player_id: Uuid, username: String, joined_at: DateTime<Utc>, node_count: u32) -> Self {
        Self {
            player_id,
            username,
            identity_ref: None,
            joined_at,
            current_position: 0,
            total_score: 0,
            responses: Vec::new(),
            is_active: true,
            finalized: false,
            disconnected_at: None,
            path: None,
            node_count,
            completed_round: None,
            completed_at: None,
        }
    }

    /// Returns true once the member has walked their full path.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns true if the member still takes part in rounds.
    #[must_use]
    pub fn is_participating(&self) -> bool {
        !self.finalized && !self.is_finished()
    }

    /// Doors left on the member's path.
    #[must_use]
    pub fn remaining_doors(&self) -> u32 {
        self.node_count.saturating_sub(self.current_position)
    }

    /// Completion percentage in `[0, 100]`.
    #[must_use]
    pub fn completion_percentage(&self) -> f64 {
        if self.is_finished() || self.node_count == 0 {
            return 100.0;
        }
        let pct = f64::from(self.current_position) / f64::from(self.node_count) * 100.0;
        pct.min(100.0)
    }

    /// Scores recorded so far.
    pub fn scores(&self) -> impl Iterator<Item = u8> + '_ {
        self.responses.iter().filter_map(|r| r.score)
    }

    /// Mean recorded score, or 0 when nothing is scored.
    #[must_use]
    pub fn average_score(&self) -> f64 {
        let (sum, count) = self
            .scores()
            .fold((0u32, 0u32), |(s, c), v| (s + u32::from(v), c + 1));
        if count == 0 {
            0.0
        } else {
            f64::from(sum) / f64::from(count)
        }
    }

    /// The member's response for `round_index`, if any.
    #[must_use]
    pub fn response_for_round(&self, round_index: u32) -> Option<&Response> {
        self.responses.iter().find(|r| r.round_index == round_index)
    }

    /// Returns true if the member already answered `door_id`.
    #[must_use]
    pub fn has_answered(&self, door_id: &DoorId) -> bool {
        self.responses.iter().any(|r| &r.door_id == door_id)
    }
}

/// Phase of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundPhase {
    /// Doors chosen and sent out.
    DoorPresented,
    /// Accepting one response per participating member.
    CollectingResponses,
    /// Waiting on scoring calls.
    Scoring,
    /// Scores applied and paths recomputed.
    PathComputed,
    /// No further doors will be presented.
    Completed,
}

/// One entry in a session's append-only door history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedRound {
    /// 1-based round number.
    pub round_index: u32,
    /// Door assigned to each participating member.
    pub assignments: BTreeMap<Uuid, Door>,
    /// Presentation time.
    pub presented_at: DateTime<Utc>,
    /// Response collection deadline.
    pub deadline: DateTime<Utc>,
}

impl PresentedRound {
    /// Door assigned to `player_id` in this round.
    #[must_use]
    pub fn door_for(&self, player_id: Uuid) -> Option<&Door> {
        self.assignments.get(&player_id)
    }
}

/// The persisted session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session identity.
    pub session_id: Uuid,
    /// Shared or solo.
    pub mode: GameMode,
    /// Optional theme filter for doors.
    pub theme: Option<String>,
    /// Player who created the session.
    pub creator_id: Uuid,
    /// Members in join order.
    pub members: Vec<Member>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Phase of the current round, once started.
    pub round_phase: Option<RoundPhase>,
    /// Door history keyed by round index.
    pub door_log: Vec<PresentedRound>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every save.
    pub version: i64,
}

impl SessionRecord {
    /// The round currently in play, if any.
    #[must_use]
    pub fn current_round(&self) -> Option<&PresentedRound> {
        self.door_log.last()
    }

    /// Index of the current round, 0 before the first door.
    #[must_use]
    pub fn current_round_index(&self) -> u32 {
        self.current_round().map_or(0, |r| r.round_index)
    }

    /// Looks up a member.
    #[must_use]
    pub fn member(&self, player_id: Uuid) -> Option<&Member> {
        self.members.iter().find(|m| m.player_id == player_id)
    }

    /// Looks up a member mutably.
    pub fn member_mut(&mut self, player_id: Uuid) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.player_id == player_id)
    }

    /// Every door a member has been shown.
    #[must_use]
    pub fn doors_seen_by(&self, player_id: Uuid) -> Vec<DoorId> {
        self.door_log
            .iter()
            .filter_map(|round| round.door_for(player_id))
            .map(|door| door.door_id.clone())
            .collect()
    }
}

/// Frozen per-player summary of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Unique identifier.
    pub entry_id: Uuid,
    /// Session the entry summarizes.
    pub session_id: Uuid,
    /// Player.
    pub player_id: Uuid,
    /// Display name at completion.
    pub username: String,
    /// Session mode.
    pub mode: GameMode,
    /// Session theme.
    pub theme: Option<String>,
    /// Sum of the player's scores.
    pub total_score: u32,
    /// Mean of the player's scores.
    pub average_score: f64,
    /// Doors the player completed.
    pub doors_completed: u32,
    /// Whether the player finished their path.
    pub finished: bool,
    /// Seconds from session start to the player's finish.
    pub completion_time_secs: Option<i64>,
    /// When the session completed.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(round_index: u32) -> Response {
        Response {
            response_id: Uuid::new_v4(),
            door_id: DoorId::new(format!("door-{round_index}")),
            player_id: Uuid::nil(),
            round_index,
            content: "take the stairs".to_owned(),
            submitted_at: Utc::now(),
            response_time_ms: Some(1200),
            score: None,
            sub_scores: None,
            score_source: None,
        }
    }

    #[test]
    fn test_status_only_moves_forward() {
        assert!(SessionStatus::Waiting.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Completed));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Waiting));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Waiting.can_transition_to(SessionStatus::Completed));
    }

    #[test]
    fn test_record_score_sets_fields_once() {
        // Arrange
        let mut r = response(1);

        // Act
        r.record_score(80, SubScores::uniform(80), ScoreSource::Service)
            .unwrap();
        let second = r.record_score(10, SubScores::uniform(10), ScoreSource::Fallback);

        // Assert
        assert_eq!(r.score, Some(80));
        assert_eq!(r.score_source, Some(ScoreSource::Service));
        assert!(matches!(second, Err(GameError::InvalidState(_))));
    }

    #[test]
    fn test_record_score_clamps_out_of_range_values() {
        let mut r = response(1);
        r.record_score(
            250,
            SubScores {
                creativity: 200,
                feasibility: 40,
                humor: 101,
                originality: 0,
            },
            ScoreSource::Service,
        )
        .unwrap();

        assert_eq!(r.score, Some(100));
        let subs = r.sub_scores.unwrap();
        assert_eq!(subs.creativity, 100);
        assert_eq!(subs.humor, 100);
    }

    #[test]
    fn test_sub_scores_average() {
        let subs = SubScores {
            creativity: 80,
            feasibility: 60,
            humor: 70,
            originality: 90,
        };
        assert_eq!(subs.average(), 75);
        assert_eq!(SubScores::uniform(50).average(), 50);
    }

    #[test]
    fn test_member_progress_helpers() {
        // Arrange
        let mut member = Member::new(Uuid::new_v4(), "ada".into(), Utc::now(), 4);
        let mut first = response(1);
        first
            .record_score(60, SubScores::uniform(60), ScoreSource::Service)
            .unwrap();
        let mut second = response(2);
        second
            .record_score(90, SubScores::uniform(90), ScoreSource::Service)
            .unwrap();
        member.responses = vec![first, second];
        member.current_position = 2;

        // Act / Assert
        assert_eq!(member.remaining_doors(), 2);
        assert!((member.completion_percentage() - 50.0).abs() < f64::EPSILON);
        assert!((member.average_score() - 75.0).abs() < f64::EPSILON);
        assert!(member.has_answered(&DoorId::new("door-2")));
        assert!(member.is_participating());
    }

    #[test]
    fn test_remaining_doors_saturates() {
        let mut member = Member::new(Uuid::new_v4(), "bo".into(), Utc::now(), 3);
        member.current_position = 5;
        assert_eq!(member.remaining_doors(), 0);
    }

    #[test]
    fn test_game_mode_round_trips_through_str() {
        for mode in [GameMode::Multiplayer, GameMode::SinglePlayer] {
            assert_eq!(GameMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(GameMode::parse("co-op"), None);
    }
}

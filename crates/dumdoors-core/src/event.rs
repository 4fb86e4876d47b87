//! Client-facing events pushed over the realtime channel.
//!
//! Every event is a [`ServerEvent`]: a session id and timestamp wrapped
//! around a closed [`EventPayload`]. On the wire this renders as
//! `{ "sessionId", "timestamp", "type", "data" }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;
use crate::model::{Door, DoorId, PathRecommendation, ScoreSource, SubScores};
use crate::view::{PlayerRanking, PlayerStanding, SessionProgress};

/// Envelope for every event sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ServerEvent {
    /// Wraps `payload` for `session_id` at `timestamp`.
    #[must_use]
    pub fn new(session_id: Uuid, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            session_id,
            timestamp,
            payload,
        }
    }

    /// Builds an `error` event from a [`GameError`].
    #[must_use]
    pub fn error(session_id: Uuid, timestamp: DateTime<Utc>, err: &GameError) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventPayload::Error {
                code: err.code().to_owned(),
                message: err.to_string(),
            },
        )
    }

    /// The wire name of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Path decision for one member at the end of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub player_id: Uuid,
    pub score: u8,
    pub recommendation: PathRecommendation,
    pub remaining_doors: u32,
    pub finished: bool,
}

/// Closed set of event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EventPayload {
    ConnectionEstablished {
        player_id: Uuid,
        reconnected: bool,
    },
    PlayerJoined {
        player_id: Uuid,
        username: String,
        member_count: usize,
    },
    PlayerLeft {
        player_id: Uuid,
        member_count: usize,
    },
    PlayerDisconnected {
        player_id: Uuid,
    },
    PlayerReconnected {
        player_id: Uuid,
    },
    PlayerFinalized {
        player_id: Uuid,
    },
    GameStarted {
        started_at: DateTime<Utc>,
        member_count: usize,
    },
    DoorPresented {
        round_index: u32,
        door: Door,
        deadline: DateTime<Utc>,
    },
    ResponseReceived {
        player_id: Uuid,
        round_index: u32,
        responded: usize,
        expected: usize,
    },
    ScoreUpdate {
        player_id: Uuid,
        round_index: u32,
        door_id: DoorId,
        score: u8,
        sub_scores: SubScores,
        source: ScoreSource,
        total_score: u32,
    },
    ProgressUpdate(SessionProgress),
    RoundCompleted {
        round_index: u32,
        outcomes: Vec<RoundOutcome>,
    },
    LeaderboardUpdate {
        standings: Vec<PlayerStanding>,
    },
    GameCompleted {
        completed_at: DateTime<Utc>,
        rankings: Vec<PlayerRanking>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl EventPayload {
    /// The wire name of this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection-established",
            Self::PlayerJoined { .. } => "player-joined",
            Self::PlayerLeft { .. } => "player-left",
            Self::PlayerDisconnected { .. } => "player-disconnected",
            Self::PlayerReconnected { .. } => "player-reconnected",
            Self::PlayerFinalized { .. } => "player-finalized",
            Self::GameStarted { .. } => "game-started",
            Self::DoorPresented { .. } => "door-presented",
            Self::ResponseReceived { .. } => "response-received",
            Self::ScoreUpdate { .. } => "score-update",
            Self::ProgressUpdate(_) => "progress-update",
            Self::RoundCompleted { .. } => "round-completed",
            Self::LeaderboardUpdate { .. } => "leaderboard-update",
            Self::GameCompleted { .. } => "game-completed",
            Self::Error { .. } => "error",
        }
    }
}

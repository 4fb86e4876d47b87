//! The session aggregate.
//!
//! `GameSession` owns a [`SessionRecord`] and is the only place members,
//! responses and the round phase change. Each mutator validates against the
//! current state, applies the change and queues the events clients should
//! see, in the order they must be delivered.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dumdoors_core::aggregate::Aggregate;
use dumdoors_core::config::{CompletionPolicy, GameConfig, SessionConfig};
use dumdoors_core::error::GameError;
use dumdoors_core::event::{EventPayload, RoundOutcome};
use dumdoors_core::model::{
    Door, GameMode, Member, PresentedRound, Response, RoundPhase, ScoreSource, SessionRecord,
    SessionStatus, SubScores,
};
use dumdoors_core::scoring::ScoreCard;
use dumdoors_progress::{final_rankings, session_progress, standings};
use uuid::Uuid;

use super::events::{Audience, SessionEvent};
use super::path::recommend;

/// A response waiting on the scoring service.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingScore {
    pub player_id: Uuid,
    pub door: Door,
    pub content: String,
}

/// Current door for one member, as last presented.
#[derive(Debug, Clone, PartialEq)]
pub struct DoorSnapshot {
    pub round_index: u32,
    pub door: Door,
    pub deadline: DateTime<Utc>,
}

/// The aggregate root for one game session.
#[derive(Debug, Clone)]
pub struct GameSession {
    record: SessionRecord,
    persisted_version: i64,
    /// Set when a write of the current state failed.
    unsaved: bool,
    uncommitted_events: Vec<SessionEvent>,
}

fn not_a_member(session_id: Uuid, player_id: Uuid) -> GameError {
    GameError::NotFound(format!(
        "player {player_id} is not a member of session {session_id}"
    ))
}

impl GameSession {
    /// Opens a session in `waiting` with the creator as its first member.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` if `username` is blank.
    pub fn create(
        session_id: Uuid,
        mode: GameMode,
        creator_id: Uuid,
        username: &str,
        theme: Option<String>,
        now: DateTime<Utc>,
        default_nodes: u32,
    ) -> Result<Self, GameError> {
        let username = validate_username(username)?;
        let theme = theme
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        let record = SessionRecord {
            session_id,
            mode,
            theme,
            creator_id,
            members: vec![Member::new(creator_id, username, now, default_nodes)],
            status: SessionStatus::Waiting,
            round_phase: None,
            door_log: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
        };
        Ok(Self::from_record(record))
    }

    /// Wraps a stored record.
    #[must_use]
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            persisted_version: record.version,
            unsaved: false,
            record,
            uncommitted_events: Vec::new(),
        }
    }

    /// The current state.
    #[must_use]
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.record.session_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.record.status
    }

    #[must_use]
    pub fn phase(&self) -> Option<RoundPhase> {
        self.record.round_phase
    }

    /// The record to write next, with its version bumped, and the version the
    /// store must currently hold.
    #[must_use]
    pub fn pending_save(&self) -> (SessionRecord, i64) {
        let mut snapshot = self.record.clone();
        snapshot.version = self.persisted_version + 1;
        (snapshot, self.persisted_version)
    }

    /// Records that `version` was written.
    pub fn mark_saved(&mut self, version: i64) {
        self.record.version = version;
        self.persisted_version = version;
        self.unsaved = false;
    }

    /// Records that the last write was lost and has to be retried.
    pub fn mark_save_failed(&mut self) {
        self.unsaved = true;
    }

    /// Whether the store is behind the in-memory state.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    fn emit(&mut self, audience: Audience, payload: EventPayload) {
        self.uncommitted_events.push(SessionEvent { audience, payload });
    }

    fn member_mut(&mut self, player_id: Uuid) -> Result<&mut Member, GameError> {
        let session_id = self.record.session_id;
        self.record
            .member_mut(player_id)
            .ok_or_else(|| not_a_member(session_id, player_id))
    }

    fn require_status(&self, expected: SessionStatus, action: &str) -> Result<(), GameError> {
        if self.record.status == expected {
            Ok(())
        } else {
            Err(GameError::InvalidState(format!(
                "cannot {action}: session {} is {}",
                self.record.session_id,
                self.record.status.as_str()
            )))
        }
    }

    fn require_phase(&self, expected: RoundPhase, action: &str) -> Result<(), GameError> {
        if self.record.round_phase == Some(expected) {
            Ok(())
        } else {
            Err(GameError::InvalidState(format!(
                "cannot {action} in phase {:?}",
                self.record.round_phase
            )))
        }
    }

    /// Adds a member.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank name, `Conflict` if the player is already a
    /// member or the session is no longer waiting, `Full` at capacity.
    pub fn join(
        &mut self,
        player_id: Uuid,
        username: &str,
        now: DateTime<Utc>,
        sessions: &SessionConfig,
        default_nodes: u32,
    ) -> Result<(), GameError> {
        let username = validate_username(username)?;
        if self.record.member(player_id).is_some() {
            return Err(GameError::Conflict(format!(
                "player {player_id} already joined session {}",
                self.record.session_id
            )));
        }
        if self.record.status != SessionStatus::Waiting {
            return Err(GameError::Conflict(format!(
                "session {} is {} and no longer accepts members",
                self.record.session_id,
                self.record.status.as_str()
            )));
        }
        let capacity = sessions.capacity(self.record.mode);
        if self.record.members.len() >= capacity {
            return Err(GameError::Full {
                session_id: self.record.session_id,
                capacity,
            });
        }
        self.record
            .members
            .push(Member::new(player_id, username.clone(), now, default_nodes));
        let member_count = self.record.members.len();
        self.emit(
            Audience::Session,
            EventPayload::PlayerJoined {
                player_id,
                username,
                member_count,
            },
        );
        Ok(())
    }

    /// Removes a member while waiting, or finalizes them once active.
    ///
    /// # Errors
    ///
    /// `NotFound` for a non-member, `InvalidState` once completed.
    pub fn leave(&mut self, player_id: Uuid) -> Result<(), GameError> {
        if self.record.member(player_id).is_none() {
            return Err(not_a_member(self.record.session_id, player_id));
        }
        match self.record.status {
            SessionStatus::Waiting => {
                self.record.members.retain(|m| m.player_id != player_id);
            }
            SessionStatus::Active => {
                let member = self.member_mut(player_id)?;
                member.finalized = true;
                member.is_active = false;
            }
            SessionStatus::Completed => {
                return Err(GameError::InvalidState(format!(
                    "session {} has already completed",
                    self.record.session_id
                )));
            }
        }
        let member_count = self.record.members.len();
        self.emit(
            Audience::Session,
            EventPayload::PlayerLeft {
                player_id,
                member_count,
            },
        );
        Ok(())
    }

    /// Moves `waiting → active`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless waiting with enough members.
    pub fn start(&mut self, now: DateTime<Utc>, sessions: &SessionConfig) -> Result<(), GameError> {
        self.require_status(SessionStatus::Waiting, "start")?;
        let needed = sessions.minimum_to_start(self.record.mode);
        let member_count = self.record.members.len();
        if member_count < needed {
            return Err(GameError::InvalidState(format!(
                "session {} needs {needed} members to start, has {member_count}",
                self.record.session_id
            )));
        }
        self.record.status = SessionStatus::Active;
        self.record.started_at = Some(now);
        self.emit(
            Audience::Session,
            EventPayload::GameStarted {
                started_at: now,
                member_count,
            },
        );
        Ok(())
    }

    /// Members still taking part in rounds.
    pub fn participants(&self) -> impl Iterator<Item = &Member> {
        self.record.members.iter().filter(|m| m.is_participating())
    }

    /// Appends a round to the door log and sends each member their door.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless active between rounds, `Validation` for an
    /// empty assignment.
    pub fn present_round(
        &mut self,
        assignments: BTreeMap<Uuid, Door>,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<u32, GameError> {
        self.require_status(SessionStatus::Active, "present a door")?;
        if !matches!(
            self.record.round_phase,
            None | Some(RoundPhase::PathComputed)
        ) {
            return Err(GameError::InvalidState(format!(
                "a round is already in progress in session {}",
                self.record.session_id
            )));
        }
        if assignments.is_empty() {
            return Err(GameError::Validation("a round needs at least one door".into()));
        }
        let round_index = self.record.current_round_index() + 1;
        for (player_id, door) in &assignments {
            self.uncommitted_events.push(SessionEvent::to_player(
                *player_id,
                EventPayload::DoorPresented {
                    round_index,
                    door: door.clone(),
                    deadline,
                },
            ));
        }
        self.record.door_log.push(PresentedRound {
            round_index,
            assignments,
            presented_at: now,
            deadline,
        });
        self.record.round_phase = Some(RoundPhase::DoorPresented);
        Ok(round_index)
    }

    /// Opens the collection window of the presented round.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless a door was just presented.
    pub fn open_collection(&mut self) -> Result<(), GameError> {
        self.require_phase(RoundPhase::DoorPresented, "open collection")?;
        self.record.round_phase = Some(RoundPhase::CollectingResponses);
        Ok(())
    }

    fn expected_responders(&self) -> Vec<Uuid> {
        let Some(round) = self.record.current_round() else {
            return Vec::new();
        };
        self.participants()
            .filter(|m| round.door_for(m.player_id).is_some())
            .map(|m| m.player_id)
            .collect()
    }

    fn responded_count(&self) -> usize {
        let round_index = self.record.current_round_index();
        self.record
            .members
            .iter()
            .filter(|m| m.response_for_round(round_index).is_some())
            .count()
    }

    /// Records a response to the member's door for the current round.
    ///
    /// # Errors
    ///
    /// `Validation` for empty or oversized content, `NotFound` for a
    /// non-member, `InvalidState` outside the collection window, `Conflict`
    /// for a second answer.
    pub fn accept_response(
        &mut self,
        player_id: Uuid,
        content: &str,
        now: DateTime<Utc>,
        max_chars: usize,
    ) -> Result<Response, GameError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GameError::Validation("response must not be empty".into()));
        }
        let length = content.chars().count();
        if length > max_chars {
            return Err(GameError::Validation(format!(
                "response is {length} characters, the limit is {max_chars}"
            )));
        }
        let session_id = self.record.session_id;
        let Some(member) = self.record.member(player_id) else {
            return Err(not_a_member(session_id, player_id));
        };
        if self.record.round_phase != Some(RoundPhase::CollectingResponses) {
            return Err(GameError::InvalidState(format!(
                "session {session_id} is not accepting responses"
            )));
        }
        if !member.is_participating() {
            return Err(GameError::InvalidState(format!(
                "player {player_id} is no longer playing in session {session_id}"
            )));
        }
        let round_index = self.record.current_round_index();
        let (door, presented_at) = match self.record.current_round() {
            Some(round) => match round.door_for(player_id) {
                Some(door) => (door.clone(), round.presented_at),
                None => {
                    return Err(GameError::InvalidState(format!(
                        "player {player_id} has no door in round {round_index}"
                    )));
                }
            },
            None => {
                return Err(GameError::InvalidState(format!(
                    "session {session_id} has no current round"
                )));
            }
        };
        if member.response_for_round(round_index).is_some() || member.has_answered(&door.door_id) {
            return Err(GameError::Conflict(format!(
                "player {player_id} already answered door {}",
                door.door_id
            )));
        }

        let response = Response {
            response_id: Uuid::now_v7(),
            door_id: door.door_id,
            player_id,
            round_index,
            content: content.to_owned(),
            submitted_at: now,
            response_time_ms: Some((now - presented_at).num_milliseconds().max(0)),
            score: None,
            sub_scores: None,
            score_source: None,
        };
        self.member_mut(player_id)?.responses.push(response.clone());

        let responded = self.responded_count();
        let expected = self.expected_responders().len();
        self.emit(
            Audience::Session,
            EventPayload::ResponseReceived {
                player_id,
                round_index,
                responded,
                expected,
            },
        );
        Ok(response)
    }

    /// Returns true once every expected member answered the current round.
    #[must_use]
    pub fn all_responded(&self) -> bool {
        let round_index = self.record.current_round_index();
        self.record.round_phase == Some(RoundPhase::CollectingResponses)
            && self.expected_responders().into_iter().all(|id| {
                self.record
                    .member(id)
                    .is_some_and(|m| m.response_for_round(round_index).is_some())
            })
    }

    /// Closes collection. Members who did not answer get an empty response
    /// scored `no_response_score`.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside the collection window.
    pub fn begin_scoring(
        &mut self,
        now: DateTime<Utc>,
        no_response_score: u8,
    ) -> Result<(), GameError> {
        self.require_phase(RoundPhase::CollectingResponses, "begin scoring")?;
        let round_index = self.record.current_round_index();
        let missing: Vec<(Uuid, Door)> = self
            .expected_responders()
            .into_iter()
            .filter_map(|id| {
                let member = self.record.member(id)?;
                if member.response_for_round(round_index).is_some() {
                    return None;
                }
                let door = self.record.current_round()?.door_for(id)?.clone();
                Some((id, door))
            })
            .collect();
        self.record.round_phase = Some(RoundPhase::Scoring);

        for (player_id, door) in missing {
            let door_id = door.door_id;
            let mut response = Response {
                response_id: Uuid::now_v7(),
                door_id: door_id.clone(),
                player_id,
                round_index,
                content: String::new(),
                submitted_at: now,
                response_time_ms: None,
                score: None,
                sub_scores: None,
                score_source: None,
            };
            response.record_score(
                no_response_score,
                SubScores::uniform(no_response_score),
                ScoreSource::NoResponse,
            )?;
            let member = self.member_mut(player_id)?;
            member.responses.push(response);
            member.total_score += u32::from(no_response_score);
            let total_score = member.total_score;
            self.emit(
                Audience::Session,
                EventPayload::ScoreUpdate {
                    player_id,
                    round_index,
                    door_id,
                    score: no_response_score,
                    sub_scores: SubScores::uniform(no_response_score),
                    source: ScoreSource::NoResponse,
                    total_score,
                },
            );
        }
        Ok(())
    }

    /// Current-round responses still waiting for a score.
    #[must_use]
    pub fn pending_scores(&self) -> Vec<PendingScore> {
        let round_index = self.record.current_round_index();
        let Some(round) = self.record.current_round() else {
            return Vec::new();
        };
        self.record
            .members
            .iter()
            .filter_map(|m| {
                let response = m.response_for_round(round_index)?;
                if response.is_scored() {
                    return None;
                }
                Some(PendingScore {
                    player_id: m.player_id,
                    door: round.door_for(m.player_id)?.clone(),
                    content: response.content.clone(),
                })
            })
            .collect()
    }

    /// Writes a score onto the member's current-round response.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside scoring or if already scored, `NotFound` if
    /// there is no response to score.
    pub fn apply_score(
        &mut self,
        player_id: Uuid,
        card: ScoreCard,
        source: ScoreSource,
    ) -> Result<(), GameError> {
        self.require_phase(RoundPhase::Scoring, "apply a score")?;
        let round_index = self.record.current_round_index();
        let member = self.member_mut(player_id)?;
        let Some(response) = member
            .responses
            .iter_mut()
            .find(|r| r.round_index == round_index)
        else {
            return Err(GameError::NotFound(format!(
                "no response from player {player_id} in round {round_index}"
            )));
        };
        response.record_score(card.score, card.sub_scores, source)?;
        let score = response.score.unwrap_or(card.score);
        let sub_scores = response.sub_scores.unwrap_or(card.sub_scores);
        let door_id = response.door_id.clone();
        member.total_score += u32::from(score);
        let total_score = member.total_score;
        self.emit(
            Audience::Session,
            EventPayload::ScoreUpdate {
                player_id,
                round_index,
                door_id,
                score,
                sub_scores,
                source,
                total_score,
            },
        );
        Ok(())
    }

    /// Advances every member scored this round and recomputes their path.
    /// Queues progress, standings and the round summary, in that order.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside scoring.
    pub fn compute_paths(
        &mut self,
        config: &GameConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoundOutcome>, GameError> {
        self.require_phase(RoundPhase::Scoring, "compute paths")?;
        let round_index = self.record.current_round_index();
        let mut outcomes = Vec::new();
        for member in &mut self.record.members {
            if member.is_finished() {
                continue;
            }
            let Some(score) = member
                .response_for_round(round_index)
                .and_then(|r| r.score)
            else {
                continue;
            };
            let recommendation = recommend(score, config);
            member.current_position += 1;
            member.path = Some(recommendation);
            member.node_count = recommendation.node_count;
            let finished = member.remaining_doors() == 0;
            if finished {
                member.completed_round = Some(round_index);
                member.completed_at = Some(now);
            }
            outcomes.push(RoundOutcome {
                player_id: member.player_id,
                score,
                recommendation,
                remaining_doors: member.remaining_doors(),
                finished,
            });
        }
        self.record.round_phase = Some(RoundPhase::PathComputed);

        self.emit(
            Audience::Session,
            EventPayload::ProgressUpdate(session_progress(&self.record)),
        );
        self.emit(
            Audience::Session,
            EventPayload::LeaderboardUpdate {
                standings: standings(&self.record),
            },
        );
        self.emit(
            Audience::Session,
            EventPayload::RoundCompleted {
                round_index,
                outcomes: outcomes.clone(),
            },
        );
        Ok(outcomes)
    }

    /// Ends a member's path before its planned length.
    pub fn finish_member_early(&mut self, player_id: Uuid, now: DateTime<Utc>) {
        let round_index = self.record.current_round_index();
        let Some(member) = self.record.member_mut(player_id) else {
            return;
        };
        if !member.is_finished() {
            member.completed_round = Some(round_index);
            member.completed_at = Some(now);
        }
    }

    /// Returns true when no further rounds should be presented.
    #[must_use]
    pub fn is_finished(&self, policy: CompletionPolicy) -> bool {
        if self.participants().next().is_none() {
            return true;
        }
        policy == CompletionPolicy::RaceToFinish
            && self.record.mode == GameMode::Multiplayer
            && self.record.members.iter().any(Member::is_finished)
    }

    /// Moves `active → completed` and queues the final standings and
    /// rankings.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless active.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), GameError> {
        if !self.record.status.can_transition_to(SessionStatus::Completed) {
            return Err(GameError::InvalidState(format!(
                "session {} cannot complete from {}",
                self.record.session_id,
                self.record.status.as_str()
            )));
        }
        self.record.status = SessionStatus::Completed;
        self.record.round_phase = Some(RoundPhase::Completed);
        self.record.completed_at = Some(now);
        self.emit(
            Audience::Session,
            EventPayload::LeaderboardUpdate {
                standings: standings(&self.record),
            },
        );
        self.emit(
            Audience::Session,
            EventPayload::GameCompleted {
                completed_at: now,
                rankings: final_rankings(&self.record),
            },
        );
        Ok(())
    }

    /// Flags a member as inside the reconnection grace window. Completed
    /// sessions are left untouched.
    pub fn mark_disconnected(&mut self, player_id: Uuid, now: DateTime<Utc>) -> bool {
        if self.record.status == SessionStatus::Completed {
            return false;
        }
        let Some(member) = self.record.member_mut(player_id) else {
            return false;
        };
        if member.finalized || !member.is_active {
            return false;
        }
        member.is_active = false;
        member.disconnected_at = Some(now);
        self.emit(
            Audience::Session,
            EventPayload::PlayerDisconnected { player_id },
        );
        true
    }

    /// Restores a member who came back within the grace window. Finalized
    /// members stay finalized.
    pub fn mark_reconnected(&mut self, player_id: Uuid) -> bool {
        if self.record.status == SessionStatus::Completed {
            return false;
        }
        let Some(member) = self.record.member_mut(player_id) else {
            return false;
        };
        if member.finalized || member.is_active {
            return false;
        }
        member.is_active = true;
        member.disconnected_at = None;
        self.emit(
            Audience::Session,
            EventPayload::PlayerReconnected { player_id },
        );
        true
    }

    /// Makes a member of an active session permanently inactive.
    pub fn finalize_member(&mut self, player_id: Uuid) -> bool {
        if self.record.status != SessionStatus::Active {
            return false;
        }
        let Some(member) = self.record.member_mut(player_id) else {
            return false;
        };
        if member.finalized {
            return false;
        }
        member.finalized = true;
        member.is_active = false;
        self.emit(Audience::Session, EventPayload::PlayerFinalized { player_id });
        true
    }

    /// Attaches a member's external identity reference. Blank references
    /// are stored as absent.
    ///
    /// # Errors
    ///
    /// `NotFound` for a non-member.
    pub fn link_identity(
        &mut self,
        player_id: Uuid,
        identity_ref: Option<String>,
    ) -> Result<(), GameError> {
        let identity_ref = identity_ref
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty());
        self.member_mut(player_id)?.identity_ref = identity_ref;
        Ok(())
    }

    /// The door a member is currently answering, if a round is open.
    #[must_use]
    pub fn door_snapshot(&self, player_id: Uuid) -> Option<DoorSnapshot> {
        if !matches!(
            self.record.round_phase,
            Some(RoundPhase::DoorPresented | RoundPhase::CollectingResponses)
        ) {
            return None;
        }
        let round = self.record.current_round()?;
        Some(DoorSnapshot {
            round_index: round.round_index,
            door: round.door_for(player_id)?.clone(),
            deadline: round.deadline,
        })
    }
}

fn validate_username(username: &str) -> Result<String, GameError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(GameError::Validation("username must not be empty".into()));
    }
    Ok(username.to_owned())
}

impl Aggregate for GameSession {
    type Event = SessionEvent;

    fn aggregate_id(&self) -> Uuid {
        self.record.session_id
    }

    fn version(&self) -> i64 {
        self.persisted_version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn take_uncommitted_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use dumdoors_core::model::{Difficulty, DoorId, PathBand};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 18, 0, 0).unwrap()
    }

    fn door(id: &str) -> Door {
        Door {
            door_id: DoorId::new(id),
            content: format!("Scenario {id}"),
            theme: "workplace".into(),
            difficulty: Difficulty::Easy,
            expected_tags: Vec::new(),
        }
    }

    fn session(mode: GameMode) -> (GameSession, Uuid) {
        let creator = Uuid::new_v4();
        let session =
            GameSession::create(Uuid::new_v4(), mode, creator, "ada", None, t0(), 6).unwrap();
        (session, creator)
    }

    /// An active two-member session collecting round 1 answers to `door-1`.
    fn collecting() -> (GameSession, Uuid, Uuid) {
        let (mut s, a) = session(GameMode::Multiplayer);
        let b = Uuid::new_v4();
        s.join(b, "bo", t0(), &SessionConfig::default(), 6).unwrap();
        s.start(t0(), &SessionConfig::default()).unwrap();
        let assignments = [(a, door("door-1")), (b, door("door-1"))].into_iter().collect();
        s.present_round(assignments, t0(), t0() + Duration::seconds(60))
            .unwrap();
        s.open_collection().unwrap();
        s.take_uncommitted_events();
        (s, a, b)
    }

    fn card(score: u8) -> ScoreCard {
        ScoreCard {
            score,
            sub_scores: SubScores::uniform(score),
        }
    }

    #[test]
    fn test_create_adds_creator_and_waits() {
        let (s, creator) = session(GameMode::Multiplayer);

        assert_eq!(s.status(), SessionStatus::Waiting);
        assert_eq!(s.record().members.len(), 1);
        assert_eq!(s.record().members[0].player_id, creator);
        assert_eq!(s.version(), 0);
    }

    #[test]
    fn test_create_rejects_blank_username() {
        let result = GameSession::create(
            Uuid::new_v4(),
            GameMode::SinglePlayer,
            Uuid::new_v4(),
            "   ",
            None,
            t0(),
            6,
        );

        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[test]
    fn test_join_enforces_duplicates_status_and_capacity() {
        // Arrange
        let config = SessionConfig {
            max_multiplayer_members: 2,
            ..SessionConfig::default()
        };
        let (mut s, creator) = session(GameMode::Multiplayer);

        // Act
        let duplicate = s.join(creator, "ada", t0(), &config, 6);
        s.join(Uuid::new_v4(), "bo", t0(), &config, 6).unwrap();
        let full = s.join(Uuid::new_v4(), "cy", t0(), &config, 6);

        // Assert
        assert!(matches!(duplicate, Err(GameError::Conflict(_))));
        assert!(matches!(full, Err(GameError::Full { capacity: 2, .. })));
        let events = s.take_uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "player-joined");
    }

    #[test]
    fn test_single_player_session_is_full_with_creator() {
        let (mut s, _) = session(GameMode::SinglePlayer);

        let result = s.join(Uuid::new_v4(), "bo", t0(), &SessionConfig::default(), 6);

        assert!(matches!(result, Err(GameError::Full { capacity: 1, .. })));
    }

    #[test]
    fn test_join_after_start_conflicts() {
        let (mut s, _, _) = collecting();

        let result = s.join(Uuid::new_v4(), "cy", t0(), &SessionConfig::default(), 6);

        assert!(matches!(result, Err(GameError::Conflict(_))));
    }

    #[test]
    fn test_start_requires_minimum_members_and_waiting() {
        // Arrange
        let (mut s, _) = session(GameMode::Multiplayer);

        // Act
        let too_few = s.start(t0(), &SessionConfig::default());
        s.join(Uuid::new_v4(), "bo", t0(), &SessionConfig::default(), 6)
            .unwrap();
        s.start(t0(), &SessionConfig::default()).unwrap();
        let again = s.start(t0(), &SessionConfig::default());

        // Assert
        assert!(matches!(too_few, Err(GameError::InvalidState(_))));
        assert!(matches!(again, Err(GameError::InvalidState(_))));
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.record().started_at, Some(t0()));
    }

    #[test]
    fn test_leave_removes_while_waiting_and_finalizes_once_active() {
        // Arrange
        let (mut waiting, _) = session(GameMode::Multiplayer);
        let guest = Uuid::new_v4();
        waiting
            .join(guest, "bo", t0(), &SessionConfig::default(), 6)
            .unwrap();
        let (mut active, _, b) = collecting();

        // Act
        waiting.leave(guest).unwrap();
        active.leave(b).unwrap();

        // Assert
        assert!(waiting.record().member(guest).is_none());
        let left = active.record().member(b).unwrap();
        assert!(left.finalized);
        assert!(!left.is_active);
        assert!(matches!(
            active.leave(Uuid::new_v4()),
            Err(GameError::NotFound(_))
        ));
    }

    #[test]
    fn test_present_round_sends_each_member_their_door() {
        // Arrange
        let (mut s, a) = session(GameMode::Multiplayer);
        let b = Uuid::new_v4();
        s.join(b, "bo", t0(), &SessionConfig::default(), 6).unwrap();
        s.start(t0(), &SessionConfig::default()).unwrap();
        s.take_uncommitted_events();
        let assignments = [(a, door("door-a")), (b, door("door-b"))].into_iter().collect();

        // Act
        let round = s
            .present_round(assignments, t0(), t0() + Duration::seconds(60))
            .unwrap();

        // Assert
        assert_eq!(round, 1);
        let events = s.take_uncommitted_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.audience == Audience::Player(a)));
        assert!(events.iter().any(|e| e.audience == Audience::Player(b)));
        assert_eq!(s.phase(), Some(RoundPhase::DoorPresented));
        assert!(
            s.present_round(BTreeMap::new(), t0(), t0()).is_err(),
            "a second round cannot start mid-round"
        );
    }

    #[test]
    fn test_accept_response_validates_in_order() {
        // Arrange
        let (mut s, a, _) = collecting();
        let now = t0() + Duration::seconds(5);

        // Act
        let empty = s.accept_response(a, "   ", now, 500);
        let long = s.accept_response(a, &"x".repeat(501), now, 500);
        let stranger = s.accept_response(Uuid::new_v4(), "hi", now, 500);
        let first = s.accept_response(a, "Ask the goose politely.", now, 500);
        let second = s.accept_response(a, "Again", now, 500);

        // Assert
        assert!(matches!(empty, Err(GameError::Validation(_))));
        assert!(matches!(long, Err(GameError::Validation(_))));
        assert!(matches!(stranger, Err(GameError::NotFound(_))));
        let response = first.unwrap();
        assert_eq!(response.response_time_ms, Some(5000));
        assert_eq!(response.round_index, 1);
        assert!(matches!(second, Err(GameError::Conflict(_))));
    }

    #[test]
    fn test_accept_response_counts_characters_not_bytes() {
        let (mut s, a, _) = collecting();

        let result = s.accept_response(a, &"é".repeat(500), t0(), 500);

        assert!(result.is_ok());
    }

    #[test]
    fn test_accept_response_outside_window_is_invalid_state() {
        let (mut s, _) = session(GameMode::Multiplayer);
        let creator = s.record().creator_id;

        let result = s.accept_response(creator, "hello", t0(), 500);

        assert!(matches!(result, Err(GameError::InvalidState(_))));
    }

    #[test]
    fn test_all_responded_tracks_participants() {
        // Arrange
        let (mut s, a, b) = collecting();

        // Act
        s.accept_response(a, "one", t0(), 500).unwrap();
        let after_one = s.all_responded();
        s.finalize_member(b);
        let after_finalize = s.all_responded();

        // Assert
        assert!(!after_one);
        assert!(after_finalize);
    }

    #[test]
    fn test_begin_scoring_fills_in_missing_responses() {
        // Arrange
        let (mut s, a, b) = collecting();
        s.accept_response(a, "answer", t0(), 500).unwrap();
        s.take_uncommitted_events();

        // Act
        s.begin_scoring(t0() + Duration::seconds(60), 0).unwrap();

        // Assert
        let missing = s.record().member(b).unwrap().response_for_round(1).unwrap();
        assert_eq!(missing.score, Some(0));
        assert_eq!(missing.score_source, Some(ScoreSource::NoResponse));
        assert!(missing.content.is_empty());
        let pending = s.pending_scores();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].player_id, a);
        assert_eq!(s.take_uncommitted_events()[0].event_type(), "score-update");
    }

    #[test]
    fn test_scores_and_paths_advance_members() {
        // Arrange
        let (mut s, a, b) = collecting();
        s.accept_response(a, "brilliant", t0(), 500).unwrap();
        s.accept_response(b, "meh", t0(), 500).unwrap();
        s.begin_scoring(t0(), 0).unwrap();
        s.take_uncommitted_events();

        // Act
        s.apply_score(a, card(85), ScoreSource::Service).unwrap();
        s.apply_score(b, card(25), ScoreSource::Service).unwrap();
        let again = s.apply_score(b, card(99), ScoreSource::Service);
        let outcomes = s.compute_paths(&GameConfig::default(), t0()).unwrap();

        // Assert
        assert!(matches!(again, Err(GameError::InvalidState(_))));
        let ma = s.record().member(a).unwrap();
        let mb = s.record().member(b).unwrap();
        assert_eq!((ma.current_position, ma.total_score), (1, 85));
        assert_eq!((mb.current_position, mb.total_score), (1, 25));
        assert_eq!(ma.path.unwrap().band, PathBand::Excellent);
        assert_eq!(ma.remaining_doors(), 2);
        assert_eq!(mb.remaining_doors(), 7);
        assert_eq!(outcomes.len(), 2);
        let types: Vec<&str> = s
            .take_uncommitted_events()
            .iter()
            .map(SessionEvent::event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "score-update",
                "score-update",
                "progress-update",
                "leaderboard-update",
                "round-completed"
            ]
        );
    }

    #[test]
    fn test_completion_policies() {
        // Arrange
        let (mut s, a, _) = collecting();
        s.finish_member_early(a, t0());

        // Act
        let race = s.is_finished(CompletionPolicy::RaceToFinish);
        let all = s.is_finished(CompletionPolicy::AllFinish);

        // Assert
        assert!(race);
        assert!(!all);
    }

    #[test]
    fn test_complete_is_forward_only() {
        // Arrange
        let (mut s, _, _) = collecting();
        let (mut waiting, _) = session(GameMode::Multiplayer);

        // Act
        s.complete(t0()).unwrap();
        let twice = s.complete(t0());
        let early = waiting.complete(t0());

        // Assert
        assert_eq!(s.status(), SessionStatus::Completed);
        assert!(matches!(twice, Err(GameError::InvalidState(_))));
        assert!(matches!(early, Err(GameError::InvalidState(_))));
        let types: Vec<&str> = s
            .take_uncommitted_events()
            .iter()
            .map(SessionEvent::event_type)
            .collect();
        assert_eq!(types, vec!["leaderboard-update", "game-completed"]);
    }

    #[test]
    fn test_disconnect_reconnect_and_finalize() {
        // Arrange
        let (mut s, _, b) = collecting();

        // Act
        assert!(s.mark_disconnected(b, t0()));
        assert!(!s.mark_disconnected(b, t0()));
        assert!(s.mark_reconnected(b));
        assert!(s.finalize_member(b));

        // Assert
        let member = s.record().member(b).unwrap();
        assert!(member.finalized);
        assert!(!s.mark_reconnected(b));
        assert!(s.door_snapshot(b).is_some());
    }

    #[test]
    fn test_link_identity_trims_and_rejects_strangers() {
        let (mut s, creator) = session(GameMode::Multiplayer);

        s.link_identity(creator, Some("  auth0|ada  ".into())).unwrap();
        let stranger = s.link_identity(Uuid::new_v4(), Some("auth0|x".into()));

        assert_eq!(
            s.record().member(creator).unwrap().identity_ref.as_deref(),
            Some("auth0|ada")
        );
        assert!(matches!(stranger, Err(GameError::NotFound(_))));
        s.link_identity(creator, Some("   ".into())).unwrap();
        assert!(s.record().member(creator).unwrap().identity_ref.is_none());
    }

    #[test]
    fn test_presence_changes_ignored_once_completed() {
        // Arrange
        let (mut s, a, b) = collecting();
        assert!(s.mark_disconnected(b, t0()));
        s.complete(t0()).unwrap();
        s.take_uncommitted_events();
        let before = s.record().clone();

        // Act
        let disconnected = s.mark_disconnected(a, t0());
        let reconnected = s.mark_reconnected(b);
        let finalized = s.finalize_member(b);

        // Assert
        assert!(!disconnected);
        assert!(!reconnected);
        assert!(!finalized);
        assert_eq!(s.record(), &before);
        assert!(s.take_uncommitted_events().is_empty());
    }

    #[test]
    fn test_finalize_needs_an_active_session() {
        let (mut s, creator) = session(GameMode::Multiplayer);

        assert!(s.mark_disconnected(creator, t0()));
        assert!(!s.finalize_member(creator));
        assert!(!s.record().member(creator).unwrap().finalized);
    }

    #[test]
    fn test_failed_save_leaves_changes_unsaved_until_written() {
        let (mut s, _) = session(GameMode::SinglePlayer);

        s.mark_save_failed();
        let pending = s.has_unsaved_changes();
        let (snapshot, _) = s.pending_save();
        s.mark_saved(snapshot.version);

        assert!(pending);
        assert!(!s.has_unsaved_changes());
    }

    #[test]
    fn test_pending_save_bumps_version() {
        let (mut s, _) = session(GameMode::SinglePlayer);

        let (snapshot, expected) = s.pending_save();
        s.mark_saved(snapshot.version);

        assert_eq!(expected, 0);
        assert_eq!(snapshot.version, 1);
        assert_eq!(s.version(), 1);
        assert_eq!(s.pending_save().1, 1);
    }
}

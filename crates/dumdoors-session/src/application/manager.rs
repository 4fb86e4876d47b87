//! Session manager: owns live sessions and drives their rounds.
//!
//! Each session sits behind its own async mutex, so commands against one
//! session are serialized while different sessions proceed independently.
//! Commands work on a copy of the aggregate and only replace the live state
//! once the copy is persisted. Round closing, intermissions and deadlines run
//! on spawned tasks that hold a weak reference back to the manager.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dumdoors_core::aggregate::Aggregate;
use dumdoors_core::clock::SharedClock;
use dumdoors_core::command::Command;
use dumdoors_core::config::ConfigHandle;
use dumdoors_core::error::GameError;
use dumdoors_core::event::{EventPayload, ServerEvent};
use dumdoors_core::model::{Door, Response, RoundPhase, SessionRecord, SessionStatus};
use dumdoors_core::repository::SessionRepository;
use dumdoors_core::view::{PlayerRanking, PlayerStanding, SessionProgress};
use dumdoors_progress::{LeaderboardService, final_rankings, session_progress, standings};
use dumdoors_realtime::{ConnectionRegistry, EventSender, Registration};
use dumdoors_scoring::ScoreOutcome;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::engine::RoundEngine;
use crate::domain::aggregates::GameSession;
use crate::domain::commands::{CreateSession, JoinSession, LeaveSession, StartGame, SubmitResponse};
use crate::domain::events::Audience;

/// Collaborators of the [`SessionManager`].
pub struct SessionManagerDeps {
    pub sessions: Arc<dyn SessionRepository>,
    pub engine: RoundEngine,
    pub registry: Arc<ConnectionRegistry>,
    pub leaderboard: Arc<LeaderboardService>,
    pub clock: SharedClock,
    pub config: ConfigHandle,
}

/// What one sweep of the connection registry did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Members finalized after their grace window ran out.
    pub finalized: usize,
    /// Completed sessions dropped from memory.
    pub evicted: usize,
}

struct SessionSlot {
    session: GameSession,
    /// Round whose scoring is in flight.
    closing: Option<u32>,
}

type SlotHandle = Arc<Mutex<SessionSlot>>;

/// Process-wide registry of live sessions.
pub struct SessionManager {
    this: Weak<SessionManager>,
    slots: DashMap<Uuid, SlotHandle>,
    sessions: Arc<dyn SessionRepository>,
    engine: RoundEngine,
    registry: Arc<ConnectionRegistry>,
    leaderboard: Arc<LeaderboardService>,
    clock: SharedClock,
    config: ConfigHandle,
}

impl SessionManager {
    #[must_use]
    pub fn new(deps: SessionManagerDeps) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            slots: DashMap::new(),
            sessions: deps.sessions,
            engine: deps.engine,
            registry: deps.registry,
            leaderboard: deps.leaderboard,
            clock: deps.clock,
            config: deps.config,
        })
    }

    /// The connection registry events are published through.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of sessions held in memory.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.slots.len()
    }

    /// An `error` event for `err`, stamped with the manager's clock.
    #[must_use]
    pub fn error_event(&self, session_id: Uuid, err: &GameError) -> ServerEvent {
        ServerEvent::error(session_id, self.clock.now(), err)
    }

    // ---- commands ----

    /// Opens a session with the creator as its first member.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank username, or the store's error if the new
    /// session cannot be saved.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), correlation_id = %command.correlation_id()))]
    pub async fn create_session(&self, command: CreateSession) -> Result<SessionRecord, GameError> {
        let config = self.config.current();
        let session_id = Uuid::new_v4();
        let mut session = GameSession::create(
            session_id,
            command.mode,
            command.creator_id,
            &command.username,
            command.theme,
            self.clock.now(),
            config.path.default_nodes,
        )?;
        session.link_identity(command.creator_id, command.identity_ref)?;
        self.persist(&mut session).await?;
        // Nobody is connected yet.
        session.take_uncommitted_events();
        let record = session.record().clone();
        self.slots.insert(
            session_id,
            Arc::new(Mutex::new(SessionSlot {
                session,
                closing: None,
            })),
        );
        info!(%session_id, mode = ?record.mode, "session created");
        Ok(record)
    }

    /// Adds a member to a waiting session.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, plus the aggregate's join errors.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), correlation_id = %command.correlation_id(), session_id = %command.session_id))]
    pub async fn join_session(&self, command: JoinSession) -> Result<SessionRecord, GameError> {
        let config = self.config.current();
        let handle = self.slot(command.session_id).await?;
        let mut slot = handle.lock().await;
        let mut next = slot.session.clone();
        next.join(
            command.player_id,
            &command.username,
            self.clock.now(),
            &config.sessions,
            config.path.default_nodes,
        )?;
        next.link_identity(command.player_id, command.identity_ref)?;
        self.persist(&mut next).await?;
        slot.session = next;
        self.publish(&mut slot.session);
        info!(player_id = %command.player_id, "player joined");
        Ok(slot.session.record().clone())
    }

    /// Removes a member while waiting, or finalizes them once the game runs.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session or member, `InvalidState` once the
    /// session completed.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), correlation_id = %command.correlation_id(), session_id = %command.session_id))]
    pub async fn leave_session(&self, command: LeaveSession) -> Result<SessionRecord, GameError> {
        let handle = self.slot(command.session_id).await?;
        let mut slot = handle.lock().await;
        let mut next = slot.session.clone();
        next.leave(command.player_id)?;
        self.persist(&mut next).await?;
        slot.session = next;
        self.publish(&mut slot.session);
        self.registry
            .unregister(command.session_id, command.player_id);
        info!(player_id = %command.player_id, "player left");
        if slot.session.all_responded() {
            self.spawn_close(command.session_id, slot.session.record().current_round_index());
        }
        Ok(slot.session.record().clone())
    }

    /// Moves a waiting session to active and presents the opening door.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `InvalidState` if the session
    /// cannot start or no door is available, or the store's error.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), correlation_id = %command.correlation_id(), session_id = %command.session_id))]
    pub async fn start_game(&self, command: StartGame) -> Result<SessionRecord, GameError> {
        let config = self.config.current();
        let handle = self.slot(command.session_id).await?;
        let mut slot = handle.lock().await;
        let mut next = slot.session.clone();
        next.start(self.clock.now(), &config.sessions)?;
        let opening = self
            .engine
            .opening_door(next.record().theme.as_deref())
            .await?
            .ok_or_else(|| {
                GameError::InvalidState("the scenario catalog has no doors to present".into())
            })?;
        self.persist(&mut next).await?;
        slot.session = next;
        self.publish(&mut slot.session);
        info!(members = slot.session.record().members.len(), "game started");
        self.present_next(&mut slot.session, Some(opening)).await?;
        Ok(slot.session.record().clone())
    }

    /// Records a member's answer to their current door.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, plus the aggregate's response
    /// errors, or the store's error.
    #[instrument(skip(self, command), fields(command_type = command.command_type(), correlation_id = %command.correlation_id(), session_id = %command.session_id))]
    pub async fn submit_response(&self, command: SubmitResponse) -> Result<Response, GameError> {
        let config = self.config.current();
        let handle = self.slot(command.session_id).await?;
        let mut slot = handle.lock().await;
        let mut next = slot.session.clone();
        let response = next.accept_response(
            command.player_id,
            &command.content,
            self.clock.now(),
            config.rounds.max_response_chars,
        )?;
        self.persist(&mut next).await?;
        slot.session = next;
        self.publish(&mut slot.session);
        debug!(player_id = %command.player_id, round = response.round_index, "response accepted");
        if slot.session.all_responded() {
            self.spawn_close(command.session_id, response.round_index);
        }
        Ok(response)
    }

    // ---- queries ----

    /// The session's current record.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, or the store's error.
    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionRecord, GameError> {
        let handle = self.slot(session_id).await?;
        let slot = handle.lock().await;
        Ok(slot.session.record().clone())
    }

    /// Whether `player_id` may open a connection to `session_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session does not exist.
    pub async fn validate_player_join(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> Result<bool, GameError> {
        let record = self.get_session(session_id).await?;
        Ok(record.member(player_id).is_some())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown session.
    pub async fn progress(&self, session_id: Uuid) -> Result<SessionProgress, GameError> {
        Ok(session_progress(&self.get_session(session_id).await?))
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown session.
    pub async fn standings(&self, session_id: Uuid) -> Result<Vec<PlayerStanding>, GameError> {
        Ok(standings(&self.get_session(session_id).await?))
    }

    /// Placements by finishing round; provisional until the game completes.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session.
    pub async fn rankings(&self, session_id: Uuid) -> Result<Vec<PlayerRanking>, GameError> {
        Ok(final_rankings(&self.get_session(session_id).await?))
    }

    // ---- connections ----

    /// Registers a member's connection and brings them up to date: the
    /// handshake, their open door if any, and current progress.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session or a non-member.
    #[instrument(skip(self, sender))]
    pub async fn connect(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        sender: EventSender,
    ) -> Result<Registration, GameError> {
        let handle = self.slot(session_id).await?;
        let mut slot = handle.lock().await;
        if slot.session.record().member(player_id).is_none() {
            return Err(GameError::NotFound(format!(
                "player {player_id} is not a member of session {session_id}"
            )));
        }
        let registration = self.registry.register(session_id, player_id, sender);
        let reconnected = slot.session.mark_reconnected(player_id);
        let now = self.clock.now();
        self.registry.send_to(
            session_id,
            player_id,
            ServerEvent::new(
                session_id,
                now,
                EventPayload::ConnectionEstablished {
                    player_id,
                    reconnected,
                },
            ),
        );
        if reconnected {
            self.persist_or_warn(&mut slot.session).await;
            info!("player reconnected within grace window");
        }
        self.publish(&mut slot.session);
        if let Some(snapshot) = slot.session.door_snapshot(player_id) {
            self.registry.send_to(
                session_id,
                player_id,
                ServerEvent::new(
                    session_id,
                    now,
                    EventPayload::DoorPresented {
                        round_index: snapshot.round_index,
                        door: snapshot.door,
                        deadline: snapshot.deadline,
                    },
                ),
            );
        }
        self.registry.send_to(
            session_id,
            player_id,
            ServerEvent::new(
                session_id,
                now,
                EventPayload::ProgressUpdate(session_progress(slot.session.record())),
            ),
        );
        Ok(registration)
    }

    /// Handles a closed connection. Stale generations are ignored.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, session_id: Uuid, player_id: Uuid, generation: u64) {
        if !self
            .registry
            .connection_lost(session_id, player_id, generation, self.clock.now())
        {
            return;
        }
        let Ok(handle) = self.slot(session_id).await else {
            return;
        };
        let mut slot = handle.lock().await;
        if slot.session.mark_disconnected(player_id, self.clock.now()) {
            info!("player disconnected, grace window started");
            self.persist_or_warn(&mut slot.session).await;
            self.publish(&mut slot.session);
        }
    }

    /// Finalizes members whose grace window ran out and evicts completed
    /// sessions nobody is connected to. A completed session stays in memory
    /// until its final state and leaderboard entries are both stored.
    pub async fn sweep(&self) -> SweepReport {
        let config = self.config.current();
        let mut report = SweepReport::default();
        for (session_id, player_id) in self
            .registry
            .take_expired(config.connections.grace_period(), self.clock.now())
        {
            let Ok(handle) = self.slot(session_id).await else {
                continue;
            };
            let mut slot = handle.lock().await;
            if !slot.session.finalize_member(player_id) {
                continue;
            }
            report.finalized += 1;
            info!(%session_id, %player_id, "grace window expired, member finalized");
            self.persist_or_warn(&mut slot.session).await;
            self.publish(&mut slot.session);
            if slot.session.all_responded() {
                self.spawn_close(session_id, slot.session.record().current_round_index());
            }
        }

        let idle: Vec<(Uuid, SlotHandle)> = self
            .slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .is_ok_and(|slot| slot.session.status() == SessionStatus::Completed)
            })
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        for (session_id, handle) in idle {
            if self.registry.has_session(session_id) {
                continue;
            }
            let settled = {
                let mut slot = handle.lock().await;
                self.settle(&mut slot.session).await
            };
            if !settled {
                continue;
            }
            if self
                .slots
                .remove_if(&session_id, |_, _| !self.registry.has_session(session_id))
                .is_some()
            {
                report.evicted += 1;
                debug!(%session_id, "completed session evicted");
            }
        }
        report
    }

    /// Writes whatever a completed session still owes the stores. Returns
    /// whether the session can be dropped from memory.
    async fn settle(&self, session: &mut GameSession) -> bool {
        let session_id = session.session_id();
        if session.has_unsaved_changes() {
            if let Err(err) = self.persist(session).await {
                warn!(%session_id, error = %err, "completed session still not persisted");
                return false;
            }
            info!(%session_id, "completed session persisted on retry");
        }
        match self.leaderboard.record_session(session.record()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(%session_id, error = %err, "leaderboard entries still not written");
                false
            }
        }
    }

    /// Sweeps forever at the configured interval.
    pub async fn run_sweeper(self: Arc<Self>) {
        loop {
            let interval = self.config.current().connections.sweep_interval();
            tokio::time::sleep(interval).await;
            let report = self.sweep().await;
            if report != SweepReport::default() {
                info!(finalized = report.finalized, evicted = report.evicted, "sweep finished");
            }
        }
    }

    // ---- round flow ----

    /// Closes a round: scores everyone, computes paths, then completes the
    /// session or schedules the next round. Stale or duplicate calls return
    /// without effect.
    #[instrument(skip(self))]
    async fn close_round(&self, session_id: Uuid, round_index: u32) {
        let Some(handle) = self.live_slot(session_id) else {
            return;
        };
        let config = self.config.current();

        let (theme, pending) = {
            let mut slot = handle.lock().await;
            if slot.session.record().current_round_index() != round_index
                || slot.closing == Some(round_index)
            {
                return;
            }
            match slot.session.phase() {
                Some(RoundPhase::DoorPresented | RoundPhase::CollectingResponses) => {
                    if slot.session.phase() == Some(RoundPhase::DoorPresented) {
                        if let Err(err) = slot.session.open_collection() {
                            warn!(error = %err, "could not open collection");
                            return;
                        }
                    }
                    if let Err(err) = slot
                        .session
                        .begin_scoring(self.clock.now(), config.rounds.no_response_score)
                    {
                        warn!(error = %err, "could not close collection");
                        return;
                    }
                    self.persist_or_warn(&mut slot.session).await;
                    self.publish(&mut slot.session);
                }
                Some(RoundPhase::Scoring) => {}
                _ => return,
            }
            slot.closing = Some(round_index);
            (
                slot.session.record().theme.clone(),
                slot.session.pending_scores(),
            )
        };

        info!(responses = pending.len(), "scoring round");
        let outcomes = self
            .engine
            .score_all(
                session_id,
                theme.as_deref(),
                pending,
                config.scoring.round_budget(),
            )
            .await;

        let mut slot = handle.lock().await;
        slot.closing = None;
        if slot.session.record().current_round_index() != round_index
            || slot.session.phase() != Some(RoundPhase::Scoring)
        {
            return;
        }
        for (player_id, outcome) in outcomes {
            if let ScoreOutcome::Fallback { reason, .. } = outcome {
                warn!(%player_id, reason = reason.as_str(), "fallback score applied");
            }
            if let Err(err) = slot
                .session
                .apply_score(player_id, outcome.card(), outcome.source())
            {
                warn!(%player_id, error = %err, "score not applied");
            }
        }
        let config = self.config.current();
        match slot.session.compute_paths(&config, self.clock.now()) {
            Ok(outcomes) => {
                info!(
                    finished = outcomes.iter().filter(|o| o.finished).count(),
                    "round completed"
                );
            }
            Err(err) => {
                warn!(error = %err, "could not compute paths");
                return;
            }
        }
        if slot.session.is_finished(config.sessions.completion_policy) {
            self.finish(&mut slot.session).await;
        } else {
            self.persist_or_warn(&mut slot.session).await;
            self.publish(&mut slot.session);
            self.schedule_next_round(session_id, round_index, config.rounds.intermission());
        }
    }

    /// Presents the round after `after_round` if the session is still
    /// waiting for it.
    #[instrument(skip(self))]
    async fn advance(&self, session_id: Uuid, after_round: u32) {
        let Some(handle) = self.live_slot(session_id) else {
            return;
        };
        let mut slot = handle.lock().await;
        if slot.session.status() != SessionStatus::Active
            || slot.session.record().current_round_index() != after_round
            || !matches!(slot.session.phase(), None | Some(RoundPhase::PathComputed))
        {
            return;
        }
        if let Err(err) = self.present_next(&mut slot.session, None).await {
            warn!(error = %err, "could not present the next round, retrying");
            self.registry.broadcast_to_session(
                session_id,
                &ServerEvent::error(session_id, self.clock.now(), &err),
            );
            let retry_after = self.config.current().rounds.intermission();
            self.schedule_next_round(session_id, after_round, retry_after);
        }
    }

    /// Picks each participant's next door and presents the round, or
    /// completes the session when nobody has a door left.
    async fn present_next(
        &self,
        session: &mut GameSession,
        opening: Option<Door>,
    ) -> Result<(), GameError> {
        let config = self.config.current();
        let now = self.clock.now();
        let theme = session.record().theme.clone();
        let opening = match opening {
            Some(door) => Some(door),
            None if session.record().current_round_index() == 0 => {
                self.engine.opening_door(theme.as_deref()).await?
            }
            None => None,
        };

        let participants: Vec<_> = session.participants().cloned().collect();
        let mut assignments = BTreeMap::new();
        for member in &participants {
            let door = match &opening {
                Some(door) => Some(door.clone()),
                None => {
                    let seen = session.record().doors_seen_by(member.player_id);
                    self.engine
                        .next_door(theme.as_deref(), member, &seen)
                        .await?
                }
            };
            match door {
                Some(door) => {
                    assignments.insert(member.player_id, door);
                }
                None => {
                    info!(player_id = %member.player_id, "no unseen doors left, path ends early");
                    session.finish_member_early(member.player_id, now);
                }
            }
        }

        if assignments.is_empty() || session.is_finished(config.sessions.completion_policy) {
            self.finish(session).await;
            return Ok(());
        }

        let timeout = config.rounds.response_timeout();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let round_index = session.present_round(assignments, now, deadline)?;
        session.open_collection()?;
        self.persist_or_warn(session).await;
        self.publish(session);
        info!(round = round_index, "round presented");
        self.schedule_deadline(session.session_id(), round_index, timeout);
        Ok(())
    }

    async fn finish(&self, session: &mut GameSession) {
        if let Err(err) = session.complete(self.clock.now()) {
            warn!(error = %err, "could not complete session");
            return;
        }
        self.persist_or_warn(session).await;
        self.publish(session);
        info!(session_id = %session.session_id(), "session completed");
        if let Err(err) = self.leaderboard.record_session(session.record()).await {
            warn!(session_id = %session.session_id(), error = %err, "leaderboard entries not written");
        }
    }

    // ---- plumbing ----

    /// Timers only act on sessions still held in memory.
    fn live_slot(&self, session_id: Uuid) -> Option<SlotHandle> {
        self.slots.get(&session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// The live slot for `session_id`, loading it from the store on a miss.
    async fn slot(&self, session_id: Uuid) -> Result<SlotHandle, GameError> {
        if let Some(handle) = self.slots.get(&session_id) {
            return Ok(Arc::clone(handle.value()));
        }
        let record = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| GameError::session_not_found(session_id))?;
        let session = GameSession::from_record(record);
        let handle = Arc::new(Mutex::new(SessionSlot {
            session: session.clone(),
            closing: None,
        }));
        match self.slots.entry(session_id) {
            Entry::Occupied(existing) => return Ok(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&handle));
            }
        }
        debug!(%session_id, "session loaded from store");
        self.resume(&session);
        Ok(handle)
    }

    /// Restarts the timers of an active session loaded from the store.
    fn resume(&self, session: &GameSession) {
        if session.status() != SessionStatus::Active {
            return;
        }
        let session_id = session.session_id();
        let round_index = session.record().current_round_index();
        match session.phase() {
            Some(RoundPhase::DoorPresented | RoundPhase::CollectingResponses) => {
                let remaining = session
                    .record()
                    .current_round()
                    .and_then(|round| (round.deadline - self.clock.now()).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                self.schedule_deadline(session_id, round_index, remaining);
            }
            Some(RoundPhase::Scoring) => self.spawn_close(session_id, round_index),
            Some(RoundPhase::PathComputed) | None => {
                self.schedule_next_round(session_id, round_index, Duration::ZERO);
            }
            Some(RoundPhase::Completed) => {}
        }
        info!(%session_id, round = round_index, "resumed active session");
    }

    async fn persist(&self, session: &mut GameSession) -> Result<(), GameError> {
        let (snapshot, expected) = session.pending_save();
        if let Err(err) = self.sessions.save(&snapshot, expected).await {
            session.mark_save_failed();
            return Err(err);
        }
        session.mark_saved(snapshot.version);
        Ok(())
    }

    /// Round transitions continue in memory when the store is down.
    async fn persist_or_warn(&self, session: &mut GameSession) {
        if let Err(err) = self.persist(session).await {
            warn!(session_id = %session.session_id(), error = %err, "session not persisted");
        }
    }

    fn publish(&self, session: &mut GameSession) {
        let session_id = session.session_id();
        let now = self.clock.now();
        for event in session.take_uncommitted_events() {
            let message = ServerEvent::new(session_id, now, event.payload);
            match event.audience {
                Audience::Session => {
                    self.registry.broadcast_to_session(session_id, &message);
                }
                Audience::Player(player_id) => {
                    self.registry.send_to(session_id, player_id, message);
                }
            }
        }
    }

    fn spawn_close(&self, session_id: Uuid, round_index: u32) {
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager.close_round(session_id, round_index).await;
        });
    }

    fn schedule_deadline(&self, session_id: Uuid, round_index: u32, after: Duration) {
        let manager = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(manager) = manager.upgrade() {
                manager.close_round(session_id, round_index).await;
            }
        });
    }

    fn schedule_next_round(&self, session_id: Uuid, after_round: u32, after: Duration) {
        let manager = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(manager) = manager.upgrade() {
                manager.advance(session_id, after_round).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::{DateTime, TimeZone, Utc};
    use dumdoors_core::config::{CompletionPolicy, GameConfig};
    use dumdoors_core::model::{DoorId, GameMode, ScoreSource};
    use dumdoors_core::repository::LeaderboardRepository;
    use dumdoors_core::rng::SharedRng;
    use dumdoors_core::scoring::ScoringService;
    use dumdoors_core::view::EntryQuery;
    use dumdoors_scoring::{BreakerRegistry, InMemoryScoringMetrics, ResilientScoringClient};
    use dumdoors_store::{
        DoorGraph, InMemoryLeaderboardRepository, InMemoryScenarioStore, InMemorySessionRepository,
    };
    use dumdoors_test_support::{
        FailingScoringService, FailingSessionRepository, ManualClock, MockRng,
        PanickingScoringService, ScriptedScoringService, StaticScoringService,
        SwitchableLeaderboardRepository, SwitchableSessionRepository,
    };
    use tokio::sync::mpsc;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 18, 0, 0).unwrap()
    }

    struct Harness {
        manager: Arc<SessionManager>,
        sessions: Arc<dyn SessionRepository>,
        entries: Arc<dyn LeaderboardRepository>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(
        scoring: Arc<dyn ScoringService>,
        config: GameConfig,
        sessions: Arc<dyn SessionRepository>,
    ) -> Harness {
        harness_with_stores(
            scoring,
            config,
            sessions,
            Arc::new(InMemoryLeaderboardRepository::new()),
        )
    }

    fn harness_with_stores(
        scoring: Arc<dyn ScoringService>,
        config: GameConfig,
        sessions: Arc<dyn SessionRepository>,
        entries: Arc<dyn LeaderboardRepository>,
    ) -> Harness {
        let config = ConfigHandle::new(config);
        let clock = Arc::new(ManualClock::new(t0()));
        let shared_clock: SharedClock = clock.clone();
        let rng: SharedRng = Arc::new(StdMutex::new(MockRng));
        let scenarios = InMemoryScenarioStore::new(DoorGraph::builtin().unwrap(), rng.clone());
        let client = ResilientScoringClient::new(
            scoring,
            Arc::new(BreakerRegistry::new()),
            config.clone(),
            rng,
            Arc::new(InMemoryScoringMetrics::new()),
        );
        let leaderboard = Arc::new(LeaderboardService::new(
            entries.clone(),
            shared_clock.clone(),
            config.clone(),
        ));
        let manager = SessionManager::new(SessionManagerDeps {
            sessions: sessions.clone(),
            engine: RoundEngine::new(Arc::new(scenarios), client),
            registry: Arc::new(ConnectionRegistry::new()),
            leaderboard,
            clock: shared_clock,
            config,
        });
        Harness {
            manager,
            sessions,
            entries,
            clock,
        }
    }

    fn harness(scoring: Arc<dyn ScoringService>) -> Harness {
        harness_with(
            scoring,
            GameConfig::default(),
            Arc::new(InMemorySessionRepository::new()),
        )
    }

    async fn create(h: &Harness, mode: GameMode, creator: Uuid) -> Uuid {
        h.manager
            .create_session(CreateSession {
                correlation_id: Uuid::new_v4(),
                mode,
                creator_id: creator,
                username: "ada".into(),
                theme: Some("workplace".into()),
                identity_ref: None,
            })
            .await
            .unwrap()
            .session_id
    }

    async fn join(h: &Harness, session_id: Uuid, player_id: Uuid) -> Result<SessionRecord, GameError> {
        h.manager
            .join_session(JoinSession {
                correlation_id: Uuid::new_v4(),
                session_id,
                player_id,
                username: "bo".into(),
                identity_ref: None,
            })
            .await
    }

    async fn start(h: &Harness, session_id: Uuid) -> Result<SessionRecord, GameError> {
        h.manager
            .start_game(StartGame {
                correlation_id: Uuid::new_v4(),
                session_id,
            })
            .await
    }

    async fn submit(
        h: &Harness,
        session_id: Uuid,
        player_id: Uuid,
        content: &str,
    ) -> Result<Response, GameError> {
        h.manager
            .submit_response(SubmitResponse {
                correlation_id: Uuid::new_v4(),
                session_id,
                player_id,
                content: content.into(),
            })
            .await
    }

    /// A started two-player session.
    async fn duel(h: &Harness) -> (Uuid, Uuid, Uuid) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let session_id = create(h, GameMode::Multiplayer, a).await;
        join(h, session_id, b).await.unwrap();
        start(h, session_id).await.unwrap();
        (session_id, a, b)
    }

    /// Answers for everyone still owing a response, then waits out scoring
    /// and the intermission.
    async fn play_round(h: &Harness, session_id: Uuid) {
        let record = h.manager.get_session(session_id).await.unwrap();
        let round = record.current_round_index();
        for member in record.members.iter().filter(|m| m.is_participating()) {
            if member.response_for_round(round).is_none() {
                let _ = submit(h, session_id, member.player_id, "I would ask for help").await;
            }
        }
        tokio::time::sleep(Duration::from_secs(4)).await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<&'static str> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.payload.event_type());
        }
        types
    }

    #[tokio::test]
    async fn test_start_presents_the_same_opening_door_to_everyone() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));

        // Act
        let (session_id, a, b) = duel(&h).await;

        // Assert
        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.round_phase, Some(RoundPhase::CollectingResponses));
        let round = record.current_round().unwrap();
        assert_eq!(round.round_index, 1);
        assert_eq!(round.door_for(a).unwrap().door_id, DoorId::new("work-volunteer"));
        assert_eq!(round.door_for(a), round.door_for(b));
        let stored = h.sessions.load(session_id).await.unwrap().unwrap();
        assert_eq!(stored.version, record.version);
        assert_eq!(stored.current_round_index(), 1);
    }

    #[tokio::test]
    async fn test_join_rejects_unknown_duplicate_and_started_sessions() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, _) = duel(&h).await;

        // Act
        let unknown = join(&h, Uuid::new_v4(), Uuid::new_v4()).await;
        let duplicate = join(&h, session_id, a).await;
        let late = join(&h, session_id, Uuid::new_v4()).await;

        // Assert
        assert!(matches!(unknown, Err(GameError::NotFound(_))));
        assert!(matches!(duplicate, Err(GameError::Conflict(_))));
        assert!(matches!(late, Err(GameError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_multiplayer_start_needs_two_members() {
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let session_id = create(&h, GameMode::Multiplayer, Uuid::new_v4()).await;

        let result = start(&h, session_id).await;

        assert!(matches!(result, Err(GameError::InvalidState(_))));
        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_submit_response_validation() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let a = Uuid::new_v4();
        let waiting = create(&h, GameMode::Multiplayer, a).await;
        let (session_id, b, _) = duel(&h).await;

        // Act
        let before_start = submit(&h, waiting, a, "too early").await;
        let empty = submit(&h, session_id, b, "   ").await;
        let stranger = submit(&h, session_id, Uuid::new_v4(), "hello").await;
        let first = submit(&h, session_id, b, "negotiate the deadline").await;
        let second = submit(&h, session_id, b, "again").await;

        // Assert
        assert!(matches!(before_start, Err(GameError::InvalidState(_))));
        assert!(matches!(empty, Err(GameError::Validation(_))));
        assert!(matches!(stranger, Err(GameError::NotFound(_))));
        assert_eq!(first.unwrap().round_index, 1);
        assert!(matches!(second, Err(GameError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_advances_along_score_driven_paths() {
        // Arrange
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let h = harness(Arc::new(
            ScriptedScoringService::new(50).for_player(a, 85).for_player(b, 25),
        ));
        let session_id = create(&h, GameMode::Multiplayer, a).await;
        join(&h, session_id, b).await.unwrap();
        start(&h, session_id).await.unwrap();

        // Act
        submit(&h, session_id, a, "I volunteer and set scope").await.unwrap();
        submit(&h, session_id, b, "I hide under the table").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let scored = h.manager.get_session(session_id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        let next = h.manager.get_session(session_id).await.unwrap();

        // Assert
        assert_eq!(scored.round_phase, Some(RoundPhase::PathComputed));
        let member_a = scored.member(a).unwrap();
        assert_eq!(member_a.current_position, 1);
        assert_eq!(member_a.node_count, 3);
        assert_eq!(scored.member(b).unwrap().node_count, 8);
        let round = next.current_round().unwrap();
        assert_eq!(round.round_index, 2);
        assert_eq!(round.door_for(a).unwrap().door_id, DoorId::new("work-printer"));
        assert_eq!(round.door_for(b).unwrap().door_id, DoorId::new("work-corner-cutting"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_scoring_outage_gives_everyone_the_same_fallback() {
        // Arrange
        let h = harness(Arc::new(FailingScoringService::unreachable()));
        let (session_id, a, b) = duel(&h).await;

        // Act
        submit(&h, session_id, a, "first").await.unwrap();
        submit(&h, session_id, b, "second").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Assert
        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.round_phase, Some(RoundPhase::PathComputed));
        for member in &record.members {
            let response = member.response_for_round(1).unwrap();
            assert_eq!(response.score, Some(50));
            assert_eq!(response.score_source, Some(ScoreSource::Fallback));
            assert_eq!(member.current_position, 1);
            assert_eq!(member.node_count, 6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_scores_missing_answers_as_no_response() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, b) = duel(&h).await;
        submit(&h, session_id, a, "on time").await.unwrap();

        // Act
        tokio::time::sleep(Duration::from_secs(61)).await;

        // Assert
        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.round_phase, Some(RoundPhase::PathComputed));
        let missed = record.member(b).unwrap().response_for_round(1).unwrap();
        assert_eq!(missed.score, Some(0));
        assert_eq!(missed.score_source, Some(ScoreSource::NoResponse));
        let answered = record.member(a).unwrap().response_for_round(1).unwrap();
        assert_eq!(answered.score, Some(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoring_panic_falls_back_and_round_still_closes() {
        let h = harness(Arc::new(PanickingScoringService));
        let (session_id, a, b) = duel(&h).await;

        submit(&h, session_id, a, "one").await.unwrap();
        submit(&h, session_id, b, "two").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.round_phase, Some(RoundPhase::PathComputed));
        assert!(record
            .members
            .iter()
            .all(|m| m.response_for_round(1).and_then(|r| r.score) == Some(50)));
    }

    #[tokio::test]
    async fn test_reconnect_replays_open_door_and_progress() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, b) = duel(&h).await;
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        h.manager.connect(session_id, a, tx_a).await.unwrap();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let first = h.manager.connect(session_id, b, tx_b).await.unwrap();
        drain(&mut rx_a);

        // Act
        h.manager.disconnect(session_id, b, first.generation).await;
        let disconnected = h.manager.get_session(session_id).await.unwrap();
        let (tx_b2, mut rx_b2) = mpsc::unbounded_channel();
        h.manager.connect(session_id, b, tx_b2).await.unwrap();

        // Assert
        assert!(!disconnected.member(b).unwrap().is_active);
        assert_eq!(
            drain(&mut rx_b2),
            vec![
                "connection-established",
                "player-reconnected",
                "door-presented",
                "progress-update"
            ]
        );
        assert_eq!(drain(&mut rx_a), vec!["player-disconnected", "player-reconnected"]);
        let record = h.manager.get_session(session_id).await.unwrap();
        assert!(record.member(b).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_connect_rejects_non_members() {
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, _, _) = duel(&h).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = h.manager.connect(session_id, Uuid::new_v4(), tx).await;

        assert!(matches!(result, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validate_player_join() {
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, _) = duel(&h).await;

        assert!(h.manager.validate_player_join(session_id, a).await.unwrap());
        assert!(!h.manager.validate_player_join(session_id, Uuid::new_v4()).await.unwrap());
        assert!(matches!(
            h.manager.validate_player_join(Uuid::new_v4(), a).await,
            Err(GameError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_grace_window_finalizes_and_unblocks_round() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, b) = duel(&h).await;
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let registration = h.manager.connect(session_id, b, tx_b).await.unwrap();
        h.manager.disconnect(session_id, b, registration.generation).await;
        submit(&h, session_id, a, "answer").await.unwrap();

        // Act
        h.clock.advance(chrono::Duration::seconds(301));
        let report = h.manager.sweep().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert
        assert_eq!(report.finalized, 1);
        let record = h.manager.get_session(session_id).await.unwrap();
        assert!(record.member(b).unwrap().finalized);
        assert_eq!(record.round_phase, Some(RoundPhase::PathComputed));
        assert!(record.member(b).unwrap().responses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_mid_round_stops_waiting_for_that_member() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(60)));
        let (session_id, a, b) = duel(&h).await;
        submit(&h, session_id, a, "answer").await.unwrap();

        // Act
        h.manager
            .leave_session(LeaveSession {
                correlation_id: Uuid::new_v4(),
                session_id,
                player_id: b,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert
        let record = h.manager.get_session(session_id).await.unwrap();
        assert!(record.member(b).unwrap().finalized);
        assert_eq!(record.round_phase, Some(RoundPhase::PathComputed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_to_finish_completes_when_first_member_finishes() {
        // Arrange
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut config = GameConfig::default();
        config.sessions.completion_policy = CompletionPolicy::RaceToFinish;
        let h = harness_with(
            Arc::new(ScriptedScoringService::new(50).for_player(a, 85).for_player(b, 25)),
            config,
            Arc::new(InMemorySessionRepository::new()),
        );
        let session_id = create(&h, GameMode::Multiplayer, a).await;
        join(&h, session_id, b).await.unwrap();
        start(&h, session_id).await.unwrap();

        // Act
        for _ in 0..3 {
            play_round(&h, session_id).await;
        }

        // Assert
        let record = h.manager.get_session(session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.member(a).unwrap().completed_round, Some(3));
        assert!(!record.member(b).unwrap().is_finished());
        let entries = h.entries.query(&EntryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_session_is_evicted_and_reloaded_from_store() {
        // Arrange
        let h = harness(Arc::new(StaticScoringService::new(90)));
        let player = Uuid::new_v4();
        let session_id = create(&h, GameMode::SinglePlayer, player).await;
        start(&h, session_id).await.unwrap();
        for _ in 0..3 {
            play_round(&h, session_id).await;
        }

        // Act
        let report = h.manager.sweep().await;
        let reloaded = h.manager.get_session(session_id).await.unwrap();

        // Assert
        assert_eq!(report.evicted, 1);
        assert_eq!(reloaded.status, SessionStatus::Completed);
        assert_eq!(reloaded.member(player).unwrap().total_score, 270);
        assert!(h.entries.has_entries_for_session(session_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsaved_completion_is_retried_before_eviction() {
        // Arrange
        let store = Arc::new(SwitchableSessionRepository::new(Arc::new(
            InMemorySessionRepository::new(),
        )));
        let h = harness_with(
            Arc::new(StaticScoringService::new(90)),
            GameConfig::default(),
            store.clone(),
        );
        let player = Uuid::new_v4();
        let session_id = create(&h, GameMode::SinglePlayer, player).await;
        start(&h, session_id).await.unwrap();
        play_round(&h, session_id).await;
        play_round(&h, session_id).await;
        submit(&h, session_id, player, "I would ask for help").await.unwrap();
        store.set_available(false);
        tokio::time::sleep(Duration::from_secs(4)).await;
        let during = h.manager.get_session(session_id).await.unwrap();
        let swept_during_outage = h.manager.sweep().await;

        // Act
        store.set_available(true);
        let report = h.manager.sweep().await;
        let reloaded = h.manager.get_session(session_id).await.unwrap();

        // Assert
        assert_eq!(during.status, SessionStatus::Completed);
        assert_eq!(swept_during_outage.evicted, 0);
        assert_eq!(report.evicted, 1);
        assert_eq!(reloaded.status, SessionStatus::Completed);
        assert_eq!(reloaded.member(player).unwrap().total_score, 270);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_leaderboard_entries_are_written_before_eviction() {
        // Arrange
        let entries = Arc::new(SwitchableLeaderboardRepository::new(Arc::new(
            InMemoryLeaderboardRepository::new(),
        )));
        let h = harness_with_stores(
            Arc::new(StaticScoringService::new(90)),
            GameConfig::default(),
            Arc::new(InMemorySessionRepository::new()),
            entries.clone(),
        );
        let player = Uuid::new_v4();
        let session_id = create(&h, GameMode::SinglePlayer, player).await;
        start(&h, session_id).await.unwrap();
        entries.set_available(false);
        for _ in 0..3 {
            play_round(&h, session_id).await;
        }
        let swept_during_outage = h.manager.sweep().await;

        // Act
        entries.set_available(true);
        let written_before_sweep = h.entries.has_entries_for_session(session_id).await.unwrap();
        let report = h.manager.sweep().await;

        // Assert
        assert_eq!(swept_during_outage.evicted, 0);
        assert!(!written_before_sweep);
        assert_eq!(report.evicted, 1);
        let written = h
            .entries
            .query(&EntryQuery::default())
            .await
            .unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].session_id, session_id);
    }

    #[tokio::test]
    async fn test_create_surfaces_store_failure() {
        let h = harness_with(
            Arc::new(StaticScoringService::new(60)),
            GameConfig::default(),
            Arc::new(FailingSessionRepository),
        );

        let result = h
            .manager
            .create_session(CreateSession {
                correlation_id: Uuid::new_v4(),
                mode: GameMode::SinglePlayer,
                creator_id: Uuid::new_v4(),
                username: "ada".into(),
                theme: None,
                identity_ref: None,
            })
            .await;

        assert!(matches!(result, Err(GameError::Infrastructure(_))));
        assert_eq!(h.manager.live_sessions(), 0);
    }
}

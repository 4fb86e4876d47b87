//! Per-(session, player) channel registry with grace-window bookkeeping.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dumdoors_core::event::ServerEvent;
use dumdoors_core::view::ConnectionQuality;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Outbound half of a client channel.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
/// Inbound half drained by the transport task.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

type ConnectionKey = (Uuid, Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connected,
    Lost { since: DateTime<Utc> },
}

#[derive(Debug)]
struct Connection {
    generation: u64,
    sender: Option<EventSender>,
    state: LinkState,
    awaiting_pong: bool,
    missed_heartbeats: u32,
}

/// How a registration relates to the previous one for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// No prior connection was known.
    Fresh,
    /// The previous channel was lost and this one resumes it.
    Reconnected,
    /// A live channel was displaced by this one.
    Replaced,
}

/// Handle returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Relationship to the previous connection.
    pub kind: RegistrationKind,
    /// Identifies this channel; stale callers holding an older generation
    /// cannot affect it.
    pub generation: u64,
}

/// Process-wide registry of live client channels.
///
/// Entries are keyed by `(session_id, player_id)` and locked per key; there is
/// no registry-wide lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionKey, Connection>,
    by_session: DashMap<Uuid, HashSet<Uuid>>,
    by_player: DashMap<Uuid, Uuid>,
    generations: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a channel for `(session_id, player_id)`.
    pub fn register(&self, session_id: Uuid, player_id: Uuid, sender: EventSender) -> Registration {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = Connection {
            generation,
            sender: Some(sender),
            state: LinkState::Connected,
            awaiting_pong: false,
            missed_heartbeats: 0,
        };
        let kind = match self.connections.insert((session_id, player_id), connection) {
            None => RegistrationKind::Fresh,
            Some(previous) => match previous.state {
                LinkState::Lost { .. } => RegistrationKind::Reconnected,
                LinkState::Connected => RegistrationKind::Replaced,
            },
        };
        self.by_session
            .entry(session_id)
            .or_default()
            .insert(player_id);
        if let Some(old_session) = self.by_player.insert(player_id, session_id) {
            if old_session != session_id {
                debug!(%player_id, %old_session, new_session = %session_id, "player moved sessions");
            }
        }
        info!(%session_id, %player_id, ?kind, generation, "connection registered");
        Registration { kind, generation }
    }

    /// Removes the connection entirely, e.g. when the member leaves.
    pub fn unregister(&self, session_id: Uuid, player_id: Uuid) {
        self.remove_entry(session_id, player_id);
        info!(%session_id, %player_id, "connection unregistered");
    }

    fn remove_entry(&self, session_id: Uuid, player_id: Uuid) {
        self.connections.remove(&(session_id, player_id));
        let now_empty = self
            .by_session
            .get_mut(&session_id)
            .is_some_and(|mut players| {
                players.remove(&player_id);
                players.is_empty()
            });
        if now_empty {
            self.by_session.remove_if(&session_id, |_, players| players.is_empty());
        }
        self.by_player
            .remove_if(&player_id, |_, current| *current == session_id);
    }

    /// Marks the channel of `generation` as lost at `now`. The entry stays so
    /// that a later [`register`](Self::register) counts as a reconnection.
    ///
    /// Returns false if a newer channel has replaced it or it was already lost.
    pub fn connection_lost(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        generation: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(mut conn) = self.connections.get_mut(&(session_id, player_id)) else {
            return false;
        };
        if conn.generation != generation || conn.state != LinkState::Connected {
            return false;
        }
        conn.state = LinkState::Lost { since: now };
        conn.sender = None;
        info!(%session_id, %player_id, generation, "connection lost");
        true
    }

    /// Sends `event` to every connected member of `session_id`. Returns the
    /// number of channels that accepted it.
    pub fn broadcast_to_session(&self, session_id: Uuid, event: &ServerEvent) -> usize {
        let players: Vec<Uuid> = self
            .by_session
            .get(&session_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        let delivered = players
            .into_iter()
            .filter(|player_id| self.send_to(session_id, *player_id, event.clone()))
            .count();
        debug!(%session_id, event_type = event.event_type(), delivered, "broadcast");
        delivered
    }

    /// Sends `event` to the player's current channel in `session_id`.
    pub fn send_to(&self, session_id: Uuid, player_id: Uuid, event: ServerEvent) -> bool {
        let Some(conn) = self.connections.get(&(session_id, player_id)) else {
            return false;
        };
        match (&conn.state, &conn.sender) {
            (LinkState::Connected, Some(sender)) => sender.send(event).is_ok(),
            _ => false,
        }
    }

    /// Sends `event` to whichever session the player is connected to.
    pub fn send_to_player(&self, player_id: Uuid, event: ServerEvent) -> bool {
        let Some(session_id) = self.by_player.get(&player_id).map(|s| *s) else {
            return false;
        };
        self.send_to(session_id, player_id, event)
    }

    /// Players with a live channel in `session_id`.
    #[must_use]
    pub fn active_connections(&self, session_id: Uuid) -> HashSet<Uuid> {
        let players: Vec<Uuid> = self
            .by_session
            .get(&session_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        players
            .into_iter()
            .filter(|player_id| self.is_connected(session_id, *player_id))
            .collect()
    }

    /// Returns true if the player has a live channel in `session_id`.
    #[must_use]
    pub fn is_connected(&self, session_id: Uuid, player_id: Uuid) -> bool {
        self.connections
            .get(&(session_id, player_id))
            .is_some_and(|c| c.state == LinkState::Connected)
    }

    /// Returns true if any entry, live or lost, exists for the session.
    #[must_use]
    pub fn has_session(&self, session_id: Uuid) -> bool {
        self.by_session.contains_key(&session_id)
    }

    /// Removes and returns every lost connection older than `grace`.
    pub fn take_expired(&self, grace: Duration, now: DateTime<Utc>) -> Vec<(Uuid, Uuid)> {
        let expired: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter_map(|entry| match entry.state {
                LinkState::Lost { since } if now - since >= grace => Some(*entry.key()),
                _ => None,
            })
            .collect();
        let mut taken = Vec::with_capacity(expired.len());
        for (session_id, player_id) in expired {
            // Skip entries that reconnected between the scan and now.
            let still_lost = self
                .connections
                .get(&(session_id, player_id))
                .is_some_and(|c| matches!(c.state, LinkState::Lost { .. }));
            if still_lost {
                self.remove_entry(session_id, player_id);
                taken.push((session_id, player_id));
            }
        }
        taken
    }

    /// Records that a protocol ping went out on channel `generation`. An
    /// earlier ping still unanswered counts as missed.
    pub fn heartbeat_sent(&self, session_id: Uuid, player_id: Uuid, generation: u64) {
        if let Some(mut conn) = self.connections.get_mut(&(session_id, player_id)) {
            if conn.generation != generation {
                return;
            }
            if conn.awaiting_pong {
                conn.missed_heartbeats += 1;
                debug!(%session_id, %player_id, missed = conn.missed_heartbeats, "heartbeat missed");
            }
            conn.awaiting_pong = true;
        }
    }

    /// Records a reply on channel `generation`.
    pub fn heartbeat_acknowledged(&self, session_id: Uuid, player_id: Uuid, generation: u64) {
        if let Some(mut conn) = self.connections.get_mut(&(session_id, player_id)) {
            if conn.generation == generation {
                conn.awaiting_pong = false;
                conn.missed_heartbeats = 0;
            }
        }
    }

    /// Link quality of the player's channel, if connected.
    #[must_use]
    pub fn connection_quality(&self, session_id: Uuid, player_id: Uuid) -> Option<ConnectionQuality> {
        self.connections
            .get(&(session_id, player_id))
            .filter(|c| c.state == LinkState::Connected)
            .map(|c| ConnectionQuality::from_missed(c.missed_heartbeats))
    }
}

//! Events raised by the session aggregate, tagged with who receives them.

use dumdoors_core::event::EventPayload;
use uuid::Uuid;

/// Recipients of a session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every live connection of the session.
    Session,
    /// One member only.
    Player(Uuid),
}

/// An event awaiting delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub audience: Audience,
    pub payload: EventPayload,
}

impl SessionEvent {
    /// An event for the whole session.
    #[must_use]
    pub fn broadcast(payload: EventPayload) -> Self {
        Self {
            audience: Audience::Session,
            payload,
        }
    }

    /// An event for `player_id` alone.
    #[must_use]
    pub fn to_player(player_id: Uuid, payload: EventPayload) -> Self {
        Self {
            audience: Audience::Player(player_id),
            payload,
        }
    }

    /// Wire name of the payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

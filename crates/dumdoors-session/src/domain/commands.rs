//! Commands accepted by the session manager.

use dumdoors_core::command::Command;
use dumdoors_core::model::GameMode;
use uuid::Uuid;

/// Command to open a new session. The creator becomes its first member.
#[derive(Debug, Clone)]
pub struct CreateSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub mode: GameMode,
    pub creator_id: Uuid,
    pub username: String,
    pub theme: Option<String>,
    /// Reference into the external identity provider.
    pub identity_ref: Option<String>,
}

impl Command for CreateSession {
    fn command_type(&self) -> &'static str {
        "session.create"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_id(&self) -> Option<Uuid> {
        None
    }
}

/// Command to join a waiting session.
#[derive(Debug, Clone)]
pub struct JoinSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub username: String,
    pub identity_ref: Option<String>,
}

impl Command for JoinSession {
    fn command_type(&self) -> &'static str {
        "session.join"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_id(&self) -> Option<Uuid> {
        Some(self.session_id)
    }
}

/// Command to leave a session.
#[derive(Debug, Clone)]
pub struct LeaveSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub session_id: Uuid,
    pub player_id: Uuid,
}

impl Command for LeaveSession {
    fn command_type(&self) -> &'static str {
        "session.leave"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_id(&self) -> Option<Uuid> {
        Some(self.session_id)
    }
}

/// Command to start a waiting session.
#[derive(Debug, Clone)]
pub struct StartGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub session_id: Uuid,
}

impl Command for StartGame {
    fn command_type(&self) -> &'static str {
        "session.start"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_id(&self) -> Option<Uuid> {
        Some(self.session_id)
    }
}

/// Command to answer the current door.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub content: String,
}

impl Command for SubmitResponse {
    fn command_type(&self) -> &'static str {
        "session.submit_response"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_id(&self) -> Option<Uuid> {
        Some(self.session_id)
    }
}

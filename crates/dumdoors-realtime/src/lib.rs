//! Connection Registry.
//!
//! Tracks which player is connected to which session over a live channel and
//! routes [`ServerEvent`](dumdoors_core::event::ServerEvent)s to them. It
//! knows nothing about game rules: losing a channel only marks the
//! connection as lost, and the session manager decides what that means.

pub mod registry;

pub use registry::{ConnectionRegistry, EventReceiver, EventSender, Registration, RegistrationKind};

//! DumDoors session orchestration.
//!
//! The [`domain`] layer holds the session aggregate and the score-to-path
//! policy; the [`application`] layer drives rounds against the scenario
//! store, the resilient scoring client and the connection registry.

pub mod application;
pub mod domain;

pub use application::engine::RoundEngine;
pub use application::manager::{SessionManager, SessionManagerDeps, SweepReport};

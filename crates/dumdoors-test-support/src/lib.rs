//! Shared test doubles and utilities for the DumDoors orchestration core.

mod clock;
mod repository;
mod rng;
mod scoring;

pub use clock::{FixedClock, ManualClock};
pub use repository::{
    FailingLeaderboardRepository, FailingSessionRepository, SwitchableLeaderboardRepository,
    SwitchableSessionRepository,
};
pub use rng::{MockRng, SequenceRng};
pub use scoring::{
    FailingScoringService, FlakyScoringService, HangingScoringService, PanickingScoringService,
    ScriptedScoringService, StaticScoringService,
};

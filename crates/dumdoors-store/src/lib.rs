//! Storage adapters for the DumDoors orchestration core.
//!
//! In-memory implementations back tests and database-less deployments;
//! PostgreSQL implementations store session documents as JSONB and
//! leaderboard entries as rows. The scenario catalog is an arena-backed door
//! graph loaded from YAML.

pub mod catalog;
pub mod memory;
pub mod pg;
pub mod schema;

pub use catalog::{DoorGraph, InMemoryScenarioStore};
pub use memory::{InMemoryLeaderboardRepository, InMemorySessionRepository};
pub use pg::{PgLeaderboardRepository, PgSessionRepository};

//! Scenario store collaborator.

use async_trait::async_trait;

use crate::error::GameError;
use crate::model::{Difficulty, Door, DoorId};

/// Criteria for drawing a random door.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioQuery {
    /// Restrict to this theme.
    pub theme: Option<String>,
    /// Restrict to this difficulty.
    pub difficulty: Option<Difficulty>,
    /// Doors that must not be returned.
    pub exclude: Vec<DoorId>,
}

/// Read-only access to door content and the door graph.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    /// Fetches a door by id.
    async fn get_scenario_by_id(&self, door_id: &DoorId) -> Result<Option<Door>, GameError>;

    /// Draws a random door matching `query`, or `None` if nothing matches.
    async fn get_random_scenario(&self, query: &ScenarioQuery) -> Result<Option<Door>, GameError>;

    /// Follows the door graph from `from` for a given score: the outgoing
    /// edge with the highest threshold not above `score`.
    async fn leads_to(&self, from: &DoorId, score: u8) -> Result<Option<DoorId>, GameError>;
}

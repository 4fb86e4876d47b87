//! Scenario catalog: an arena-backed door graph with YAML loading.
//!
//! Doors live in a `Vec` and are referenced by index; `leads_to` edges are
//! keyed by `(from, threshold)` so the edge for a score is a single range
//! lookup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use dumdoors_core::error::GameError;
use dumdoors_core::model::{Difficulty, Door, DoorId, MAX_SCORE};
use dumdoors_core::rng::{SharedRng, pick_index};
use dumdoors_core::scenario::{ScenarioQuery, ScenarioStore};
use serde::Deserialize;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../catalog/doors.yaml");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    doors: Vec<CatalogDoor>,
}

#[derive(Debug, Deserialize)]
struct CatalogDoor {
    id: String,
    theme: String,
    difficulty: Difficulty,
    content: String,
    #[serde(default)]
    expected_tags: Vec<String>,
    #[serde(default)]
    leads_to: Vec<CatalogEdge>,
}

#[derive(Debug, Deserialize)]
struct CatalogEdge {
    threshold: u8,
    door: String,
}

/// Doors plus score-gated `leads_to` edges.
#[derive(Debug, Clone, Default)]
pub struct DoorGraph {
    nodes: Vec<Door>,
    index: HashMap<DoorId, usize>,
    edges: BTreeMap<(usize, u8), usize>,
}

impl DoorGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML catalog.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` for malformed YAML, duplicate ids,
    /// thresholds above the score ceiling or edges to unknown doors.
    pub fn from_yaml_str(source: &str) -> Result<Self, GameError> {
        let file: CatalogFile = serde_yaml::from_str(source)
            .map_err(|e| GameError::Validation(format!("invalid door catalog: {e}")))?;
        let mut graph = Self::new();
        for door in &file.doors {
            graph.add_door(Door {
                door_id: DoorId::new(door.id.clone()),
                content: door.content.clone(),
                theme: door.theme.clone(),
                difficulty: door.difficulty,
                expected_tags: door.expected_tags.clone(),
            })?;
        }
        for door in &file.doors {
            let from = DoorId::new(door.id.clone());
            for edge in &door.leads_to {
                graph
                    .add_edge(&from, edge.threshold, &DoorId::new(edge.door.clone()))
                    .map_err(|e| GameError::Validation(format!("invalid door catalog: {e}")))?;
            }
        }
        Ok(graph)
    }

    /// Reads and parses a YAML catalog file.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Infrastructure` if the file cannot be read, or the
    /// errors of [`DoorGraph::from_yaml_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            GameError::Infrastructure(format!("cannot read door catalog {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&source)
    }

    /// The catalog compiled into the binary.
    ///
    /// # Errors
    ///
    /// Only fails if the embedded catalog is malformed.
    pub fn builtin() -> Result<Self, GameError> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    /// Adds a door.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Conflict` if the id is already present.
    pub fn add_door(&mut self, door: Door) -> Result<(), GameError> {
        if self.index.contains_key(&door.door_id) {
            return Err(GameError::Conflict(format!(
                "door {} is already in the catalog",
                door.door_id
            )));
        }
        self.index.insert(door.door_id.clone(), self.nodes.len());
        self.nodes.push(door);
        Ok(())
    }

    /// Adds an edge followed when a score on `from` is at least `threshold`.
    ///
    /// # Errors
    ///
    /// Returns `GameError::NotFound` if either door is unknown and
    /// `GameError::Validation` if `threshold` exceeds the score ceiling.
    pub fn add_edge(&mut self, from: &DoorId, threshold: u8, to: &DoorId) -> Result<(), GameError> {
        if threshold > MAX_SCORE {
            return Err(GameError::Validation(format!(
                "threshold {threshold} on door {from} exceeds {MAX_SCORE}"
            )));
        }
        let from_idx = self.position(from)?;
        let to_idx = self.position(to)?;
        self.edges.insert((from_idx, threshold), to_idx);
        Ok(())
    }

    fn position(&self, id: &DoorId) -> Result<usize, GameError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GameError::NotFound(format!("door {id} not found")))
    }

    /// Looks up a door.
    #[must_use]
    pub fn door(&self, id: &DoorId) -> Option<&Door> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// The door reached from `from` with `score`: the edge with the highest
    /// threshold not above the score.
    #[must_use]
    pub fn next(&self, from: &DoorId, score: u8) -> Option<&Door> {
        let from_idx = *self.index.get(from)?;
        self.edges
            .range((from_idx, 0)..=(from_idx, score))
            .next_back()
            .map(|(_, &to)| &self.nodes[to])
    }

    /// Doors matching `query`, in catalog order.
    #[must_use]
    pub fn candidates(&self, query: &ScenarioQuery) -> Vec<&Door> {
        self.nodes
            .iter()
            .filter(|d| query.theme.as_deref().is_none_or(|t| d.theme == t))
            .filter(|d| query.difficulty.is_none_or(|level| d.difficulty == level))
            .filter(|d| !query.exclude.contains(&d.door_id))
            .collect()
    }

    /// Number of doors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no doors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// [`ScenarioStore`] over a [`DoorGraph`], drawing random doors with an
/// injected RNG.
pub struct InMemoryScenarioStore {
    graph: DoorGraph,
    rng: SharedRng,
}

impl InMemoryScenarioStore {
    /// Creates a store over `graph`.
    #[must_use]
    pub fn new(graph: DoorGraph, rng: SharedRng) -> Self {
        Self { graph, rng }
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &DoorGraph {
        &self.graph
    }
}

#[async_trait]
impl ScenarioStore for InMemoryScenarioStore {
    async fn get_scenario_by_id(&self, door_id: &DoorId) -> Result<Option<Door>, GameError> {
        Ok(self.graph.door(door_id).cloned())
    }

    async fn get_random_scenario(&self, query: &ScenarioQuery) -> Result<Option<Door>, GameError> {
        let candidates = self.graph.candidates(query);
        let picked = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| GameError::Infrastructure("scenario rng lock poisoned".into()))?;
            pick_index(&mut *rng, candidates.len())
        };
        debug!(
            theme = query.theme.as_deref(),
            difficulty = query.difficulty.map(Difficulty::as_str),
            candidates = candidates.len(),
            "drew scenario"
        );
        Ok(picked.map(|i| candidates[i].clone()))
    }

    async fn leads_to(&self, from: &DoorId, score: u8) -> Result<Option<DoorId>, GameError> {
        Ok(self.graph.next(from, score).map(|d| d.door_id.clone()))
    }
}

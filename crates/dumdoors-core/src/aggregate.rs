//! Aggregate root abstraction.

use uuid::Uuid;

/// Trait for aggregate roots that record the events their commands produce.
///
/// Events accumulate as the aggregate is mutated and are drained by the
/// owning service once the new state has been persisted.
pub trait Aggregate: Send + Sync {
    /// The event type this aggregate produces.
    type Event;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current persisted version.
    fn version(&self) -> i64;

    /// Returns events produced since the last drain.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Drains the uncommitted events.
    fn take_uncommitted_events(&mut self) -> Vec<Self::Event>;
}

//! Round orchestration.

pub mod engine;
pub mod manager;

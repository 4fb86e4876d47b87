//! DumDoors Core: shared domain model and abstractions.
//!
//! This crate defines the data model, error taxonomy, client-facing event
//! type, configuration surface, and the collaborator traits that every other
//! crate in the workspace depends on. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod repository;
pub mod rng;
pub mod scenario;
pub mod scoring;
pub mod view;

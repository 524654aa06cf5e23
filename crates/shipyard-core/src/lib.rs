//! Deployment orchestration engine and repository trait definitions for Shipyard.
//!
//! This crate holds the state machine executor, the built-in deployment
//! states and the "ports" (repository and collaborator traits) that the
//! infrastructure layer implements. It depends only on `shipyard-types` --
//! never on `shipyard-infra` or any database/IO crate.

pub mod aggregate;
pub mod collaborator;
pub mod context;
pub mod definition;
pub mod event;
pub mod executor;
pub mod notify;
pub mod repository;
pub mod resize;
pub mod rollback;
pub mod state;
pub mod states;

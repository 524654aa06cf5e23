//! Shared domain types for Shipyard.
//!
//! This crate contains the types every other Shipyard crate speaks:
//! execution statuses, context elements, state execution instances and
//! their data, notify payloads, remote tasks, events and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod element;
pub mod error;
pub mod event;
pub mod execution_data;
pub mod instance;
pub mod notify;
pub mod resize;
pub mod status;
pub mod task;

//! Infrastructure layer for Shipyard.
//!
//! Contains implementations of the ports defined in `shipyard-core`: the
//! SQLite instance repository and activity sink, the TOML config loader, a
//! channel-backed task dispatcher with its poll/backoff companion, and a
//! static settings resolver.

pub mod config;
pub mod dispatch;
pub mod poller;
pub mod settings;
pub mod sqlite;

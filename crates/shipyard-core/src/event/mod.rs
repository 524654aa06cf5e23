//! Execution event bus.
//!
//! The executor publishes an `ExecutionEvent` for every lifecycle transition;
//! subscribers (loggers, UIs, tests) receive them over a
//! `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;

//! SQLite storage layer.
//!
//! Instance repository and activity sink backed by SQLite with WAL mode and
//! split read/write connection pools.

pub mod activity;
pub mod instance;
pub mod pool;

pub use activity::{SqliteActivitySink, list_activities};
pub use instance::SqliteInstanceRepository;
pub use pool::{DatabasePool, default_database_url};

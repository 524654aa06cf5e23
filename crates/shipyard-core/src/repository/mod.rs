//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (shipyard-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod instance;
pub mod memory;

pub use instance::InstanceRepository;
pub use memory::InMemoryInstanceStore;

//! Repository trait definitions (ports).
//!
//! The infrastructure layer (keelson-infra) implements `CheckpointStore` with
//! SQLite. `InMemoryCheckpointStore` backs tests and embedded use.

pub mod checkpoint;
pub mod memory;

pub use checkpoint::{CheckpointStore, DeleteOutcome, StatusUpdate};
pub use memory::InMemoryCheckpointStore;

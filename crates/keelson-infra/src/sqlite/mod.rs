//! SQLite storage layer.
//!
//! The durable `CheckpointStore` used by the CLI, backed by SQLite with WAL
//! mode and split read/write connection pools.

pub mod checkpoint;
pub mod pool;

pub use checkpoint::SqliteCheckpointStore;
pub use pool::DatabasePool;

//! Infrastructure layer for keelson.
//!
//! Implements the `CheckpointStore` port from `keelson-core` on SQLite and
//! loads engine configuration from the data directory.

pub mod config;
pub mod sqlite;

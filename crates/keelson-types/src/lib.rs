//! Shared domain types for keelson.
//!
//! This crate contains the data the workflow engine passes around: workflow
//! statuses, task graphs and options, persisted checkpoint/event records,
//! engine configuration and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod status;
pub mod workflow;

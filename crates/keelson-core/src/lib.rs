//! Workflow engine core for keelson.
//!
//! This crate defines the checkpoint store port that the infrastructure layer
//! implements, the task runtime seam, the event bridge, and the engine itself:
//! graph validation, the resumable graph walker and the workflow manager.
//! It depends only on `keelson-types` -- never on `keelson-infra` or any
//! database crate.

pub mod codec;
pub mod event;
pub mod repository;
pub mod runtime;
pub mod workflow;

//! Durable workflow execution.
//!
//! - `definition` -- YAML workflow files and graph validation
//! - `dag` -- dependency plan, cycle detection, resume-aware node selection
//! - `status` -- workflow status machine
//! - `checkpoint` -- typed access to workflow, task and event records
//! - `context` -- per-run outputs and argument resolution
//! - `retry` -- backoff policy between task attempts
//! - `executor` -- single task execution with retries and commit
//! - `walker` -- readiness-driven graph traversal
//! - `manager` -- run, resume, cancel, delete, recovery and queries
//! - `controller` -- process-wide manager slot

pub mod checkpoint;
pub mod context;
pub mod controller;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod manager;
pub mod retry;
pub mod status;
pub mod walker;

pub use checkpoint::{CheckpointManager, StatusChange, TaskOutput};
pub use controller::Controller;
pub use dag::ExecutionPlan;
pub use definition::{load_workflow_file, parse_workflow_yaml, validate_graph};
pub use executor::TaskExecutor;
pub use manager::{EngineOptions, RunRequest, WorkflowHandle, WorkflowManager};
pub use walker::GraphWalker;

use thiserror::Error;

use crate::status::{StatusEvent, WorkflowStatus};

/// Errors surfaced by the workflow engine to its callers.
///
/// Coordination errors (not found, invalid transition, running) are returned
/// synchronously. Task failures only appear here once retries are exhausted
/// and the task did not ask for exceptions to be caught.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("cannot {operation} workflow '{workflow_id}' while it is running")]
    Running {
        operation: String,
        workflow_id: String,
    },

    #[error("invalid status transition: cannot {event} a workflow in status {from}")]
    InvalidTransition {
        from: WorkflowStatus,
        event: StatusEvent,
    },

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("task '{task_name}' failed after {attempts} attempt(s): {error}")]
    TaskExecution {
        task_name: String,
        attempts: u32,
        error: String,
    },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("task '{task_name}' not found in workflow '{workflow_id}'")]
    TaskNotFound {
        workflow_id: String,
        task_name: String,
    },

    #[error("output not available: {0}")]
    OutputUnavailable(String),

    #[error("workflow '{workflow_id}' failed: {error}")]
    Failed { workflow_id: String, error: String },

    #[error("workflow '{0}' was canceled")]
    Cancelled(String),

    #[error("workflow '{0}' was interrupted and can be resumed")]
    Interrupted(String),

    #[error("task '{task_name}' of workflow '{workflow_id}' is already executing")]
    TaskInFlight {
        workflow_id: String,
        task_name: String,
    },

    #[error("no task function registered as '{0}'")]
    UnknownFunction(String),

    #[error("no event listener registered as '{0}'")]
    UnknownListener(String),

    #[error("workflow engine is not initialized")]
    NotInitialized,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl WorkflowError {
    /// True for the error a caller gets back from a run that was stopped
    /// on purpose rather than one that failed.
    pub fn is_stopped(&self) -> bool {
        matches!(self, WorkflowError::Cancelled(_) | WorkflowError::Interrupted(_))
    }
}

/// Errors from repository operations (used by trait definitions in keelson-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

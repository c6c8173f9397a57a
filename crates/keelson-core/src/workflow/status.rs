//! Workflow status machine.
//!
//! Pure functions, no side effects. Every component that changes a workflow's
//! status asks `transition` first.

use keelson_types::error::WorkflowError;
use keelson_types::status::{StatusEvent, WorkflowStatus};

/// Status of a workflow that has never run.
pub fn initial_status() -> WorkflowStatus {
    WorkflowStatus::None
}

/// The status `event` moves `current` to, or `InvalidTransition`.
pub fn transition(
    current: WorkflowStatus,
    event: StatusEvent,
) -> Result<WorkflowStatus, WorkflowError> {
    use StatusEvent as E;
    use WorkflowStatus as S;

    match (current, event) {
        (S::None | S::Resumable | S::Failed, E::Start) => Ok(S::Running),
        (S::Running, E::Succeed) => Ok(S::Successful),
        (S::Running, E::Fail) => Ok(S::Failed),
        (S::Running | S::Resumable, E::Cancel) => Ok(S::Canceled),
        (S::Running, E::Interrupt) => Ok(S::Resumable),
        (from, event) => Err(WorkflowError::InvalidTransition { from, event }),
    }
}

/// Whether `event` is legal from `current`.
pub fn can_transition(current: WorkflowStatus, event: StatusEvent) -> bool {
    transition(current, event).is_ok()
}

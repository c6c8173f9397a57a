//! Run-lifecycle notifications published on the engine's event bus.
//!
//! These are observability events for subscribers (CLI progress, tests,
//! `get_output` waiters). They are not the external events an event listener
//! feeds into a graph.

use serde::{Deserialize, Serialize};

use crate::status::WorkflowStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The graph walker began (or resumed) a workflow.
    WorkflowStarted { workflow_id: String, resumed: bool },

    /// A task produced an output. `checkpointed` is false for tasks that
    /// keep their output in memory only.
    TaskCommitted {
        workflow_id: String,
        task_name: String,
        retry_count: u32,
        checkpointed: bool,
    },

    /// A task attempt failed.
    TaskFailed {
        workflow_id: String,
        task_name: String,
        error: String,
        will_retry: bool,
    },

    /// The run stopped and its status was recorded.
    WorkflowFinished {
        workflow_id: String,
        status: WorkflowStatus,
    },
}

impl RunEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            RunEvent::WorkflowStarted { workflow_id, .. }
            | RunEvent::TaskCommitted { workflow_id, .. }
            | RunEvent::TaskFailed { workflow_id, .. }
            | RunEvent::WorkflowFinished { workflow_id, .. } => workflow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_event_tagged_serialization() {
        let event = RunEvent::WorkflowFinished {
            workflow_id: "wf-1".to_string(),
            status: WorkflowStatus::Successful,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_finished");
        assert_eq!(json["status"], "SUCCESSFUL");
        assert_eq!(event.workflow_id(), "wf-1");
    }
}

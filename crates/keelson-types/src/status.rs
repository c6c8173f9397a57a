//! Lifecycle enums for workflows, task checkpoints and event records.
//!
//! `WorkflowStatus` is the closed set of states a workflow run can be in.
//! Callers may name statuses as strings at the API boundary; `StatusFilter`
//! normalizes those into the enum before anything reaches the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Never run.
    None,
    Running,
    Successful,
    Failed,
    Canceled,
    /// Interrupted mid-run with checkpoints retained.
    Resumable,
}

impl WorkflowStatus {
    /// Every status, in declaration order.
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::None,
        WorkflowStatus::Running,
        WorkflowStatus::Successful,
        WorkflowStatus::Failed,
        WorkflowStatus::Canceled,
        WorkflowStatus::Resumable,
    ];

    /// Upper-case wire name, also used as the stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::None => "NONE",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Successful => "SUCCESSFUL",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Canceled => "CANCELED",
            WorkflowStatus::Resumable => "RESUMABLE",
        }
    }

    /// SUCCESSFUL, FAILED and CANCELED.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Successful | WorkflowStatus::Failed | WorkflowStatus::Canceled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(WorkflowStatus::None),
            "RUNNING" => Ok(WorkflowStatus::Running),
            "SUCCESSFUL" => Ok(WorkflowStatus::Successful),
            "FAILED" => Ok(WorkflowStatus::Failed),
            "CANCELED" | "CANCELLED" => Ok(WorkflowStatus::Canceled),
            "RESUMABLE" => Ok(WorkflowStatus::Resumable),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// Something that happened to a workflow and may move it to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    /// `run` or `resume` began executing the graph.
    Start,
    /// The sink task committed.
    Succeed,
    /// A task exhausted its retries or the run hit an unhandled error.
    Fail,
    /// Explicit user cancel.
    Cancel,
    /// The coordinator stopped (shutdown or crash) before the run finished.
    Interrupt,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Start => write!(f, "start"),
            StatusEvent::Succeed => write!(f, "succeed"),
            StatusEvent::Fail => write!(f, "fail"),
            StatusEvent::Cancel => write!(f, "cancel"),
            StatusEvent::Interrupt => write!(f, "interrupt"),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusFilter
// ---------------------------------------------------------------------------

/// Which statuses `list_all` should return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Every status except `NONE`.
    #[default]
    Any,
    /// Exactly these statuses.
    Only(BTreeSet<WorkflowStatus>),
}

impl StatusFilter {
    /// Normalize a list of status names. An empty list means `Any`.
    pub fn parse<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut statuses = BTreeSet::new();
        let mut seen_any = false;
        for name in names {
            seen_any = true;
            statuses.insert(name.as_ref().parse::<WorkflowStatus>()?);
        }
        if seen_any {
            Ok(StatusFilter::Only(statuses))
        } else {
            Ok(StatusFilter::Any)
        }
    }

    /// The concrete set of statuses this filter admits.
    pub fn resolve(&self) -> BTreeSet<WorkflowStatus> {
        match self {
            StatusFilter::Any => WorkflowStatus::ALL
                .into_iter()
                .filter(|s| *s != WorkflowStatus::None)
                .collect(),
            StatusFilter::Only(set) => set.clone(),
        }
    }
}

impl From<WorkflowStatus> for StatusFilter {
    fn from(status: WorkflowStatus) -> Self {
        StatusFilter::Only(BTreeSet::from([status]))
    }
}

impl FromIterator<WorkflowStatus> for StatusFilter {
    fn from_iter<T: IntoIterator<Item = WorkflowStatus>>(iter: T) -> Self {
        StatusFilter::Only(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Task and event record states
// ---------------------------------------------------------------------------

/// Outcome stored in a task checkpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Committed output; write-once.
    Successful,
    /// Retries exhausted. A later attempt may replace this record.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Successful => "SUCCESSFUL",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESSFUL" => Ok(TaskStatus::Successful),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("invalid task status: '{other}'")),
        }
    }
}

/// Two-stage state of an event bound into a workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    /// Polling the source; nothing durable yet besides the intent.
    Waiting,
    /// Payload durably recorded. Only now may the source be acknowledged.
    Committed,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Waiting => "WAITING",
            EventState::Committed => "COMMITTED",
        }
    }
}

impl FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(EventState::Waiting),
            "COMMITTED" => Ok(EventState::Committed),
            other => Err(format!("invalid event state: '{other}'")),
        }
    }
}

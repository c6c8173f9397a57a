//! Checkpoint store trait definition.
//!
//! Defines the durable storage interface for workflow records, task
//! checkpoints and event records. The infrastructure layer (keelson-infra)
//! implements this trait with SQLite persistence.

use chrono::{DateTime, Utc};
use keelson_types::error::RepositoryError;
use keelson_types::status::WorkflowStatus;
use keelson_types::workflow::{EventRecord, TaskCheckpoint, WorkflowRecord};

/// A compare-and-set status change for a workflow record.
///
/// Applied only while the stored status still equals `from`. `owner`,
/// `error`, `ended_at` and `heartbeat_at` always overwrite the stored values;
/// `output` and `started_at` overwrite only when present.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub owner: Option<String>,
    pub output: Option<Vec<u8>>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(from: WorkflowStatus, to: WorkflowStatus) -> Self {
        Self {
            from,
            to,
            owner: None,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
            heartbeat_at: None,
        }
    }

    /// Apply this update to an in-memory record. Does not check `from`.
    pub fn apply_to(&self, record: &mut WorkflowRecord) {
        record.status = self.to;
        record.owner = self.owner.clone();
        record.error = self.error.clone();
        record.ended_at = self.ended_at;
        record.heartbeat_at = self.heartbeat_at;
        if let Some(output) = &self.output {
            record.output = Some(output.clone());
        }
        if let Some(started_at) = self.started_at {
            record.started_at = Some(started_at);
        }
    }
}

/// Result of a conditional workflow delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The workflow is RUNNING; nothing was removed.
    Running,
}

/// Durable storage for everything needed to resume a workflow.
///
/// Covers three record families:
/// - **Workflows:** one metadata record per run, with compare-and-set status.
/// - **Tasks:** one checkpoint per `(workflow_id, task_name)`. A SUCCESSFUL
///   record is write-once; a FAILED record may be replaced.
/// - **Events:** one record per event node, WAITING then COMMITTED.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Insert or fully replace a workflow record.
    fn upsert_workflow(
        &self,
        record: &WorkflowRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRecord>, RepositoryError>> + Send;

    /// Apply `update` if the stored status equals `update.from`.
    ///
    /// Returns `false` when the record is missing or its status moved on.
    fn update_status(
        &self,
        workflow_id: &str,
        update: &StatusUpdate,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Refresh the liveness stamp of a RUNNING workflow owned by `owner`.
    ///
    /// Returns `false` if the workflow is no longer RUNNING under that owner.
    fn heartbeat(
        &self,
        workflow_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Workflow ids and statuses whose status is in `statuses`, oldest first.
    fn list_workflows(
        &self,
        statuses: &[WorkflowStatus],
    ) -> impl std::future::Future<Output = Result<Vec<(String, WorkflowStatus)>, RepositoryError>> + Send;

    /// Remove a workflow and all of its task and event records, unless it
    /// is RUNNING.
    ///
    /// The status check and the purge happen atomically.
    fn delete_workflow(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<DeleteOutcome, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn get_task(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<TaskCheckpoint>, RepositoryError>> + Send;

    /// Write a task checkpoint unless a SUCCESSFUL one already exists.
    ///
    /// Returns `false` (and leaves the store untouched) in that case.
    fn commit_task(
        &self,
        checkpoint: &TaskCheckpoint,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn list_tasks(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TaskCheckpoint>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Insert or replace an event record.
    fn put_event(
        &self,
        record: &EventRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_event(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<EventRecord>, RepositoryError>> + Send;
}

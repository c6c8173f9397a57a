//! Checkpoint protocol: durable reads and writes of workflow state.
//!
//! Wraps a `CheckpointStore` and a `Codec` to provide the operations the
//! executor, walker and manager need. Task outputs, event payloads and the
//! workflow output cross this boundary as `serde_json::Value` and are stored
//! as codec bytes. Status changes go through the status machine and are
//! applied with compare-and-set so a concurrent cancel is never overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keelson_types::error::{RepositoryError, WorkflowError};
use keelson_types::status::{EventState, StatusEvent, StatusFilter, TaskStatus, WorkflowStatus};
use keelson_types::workflow::{EventRecord, TaskCheckpoint, TaskStats, WorkflowRecord};
use serde_json::Value;

use super::status::transition;
use crate::codec::Codec;
use crate::repository::checkpoint::{CheckpointStore, DeleteOutcome, StatusUpdate};

/// Attempts made by `transition_status` when the stored status keeps moving.
const TRANSITION_ATTEMPTS: usize = 3;

/// What `load_task_output` found for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// A committed output. Never re-executed.
    Committed(Value),
    /// The task exhausted its retries; carries the recorded error.
    Failed(String),
    /// Nothing durable exists for this task.
    NotPersisted,
}

/// Fields written alongside a status transition. See [`StatusUpdate`] for
/// which fields overwrite and which coalesce.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub owner: Option<String>,
    pub output: Option<Vec<u8>>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    fn into_update(self, from: WorkflowStatus, to: WorkflowStatus) -> StatusUpdate {
        StatusUpdate {
            from,
            to,
            owner: self.owner,
            output: self.output,
            error: self.error,
            started_at: self.started_at,
            ended_at: self.ended_at,
            heartbeat_at: self.heartbeat_at,
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `S: CheckpointStore` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
    codec: Arc<dyn Codec>,
}

fn store_err(err: RepositoryError) -> WorkflowError {
    WorkflowError::Checkpoint(err.to_string())
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: S, codec: Arc<dyn Codec>) -> Self {
        Self { store, codec }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, WorkflowError> {
        Ok(self.codec.encode(value)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, WorkflowError> {
        Ok(self.codec.decode(bytes)?)
    }

    // -----------------------------------------------------------------------
    // Workflow records
    // -----------------------------------------------------------------------

    /// Load a workflow record, or `NotFound`.
    pub async fn load_workflow_metadata(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowRecord, WorkflowError> {
        self.find_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    pub async fn find_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRecord>, WorkflowError> {
        self.store.get_workflow(workflow_id).await.map_err(store_err)
    }

    /// Idempotent upsert of the whole record.
    pub async fn save_workflow_metadata(&self, record: &WorkflowRecord) -> Result<(), WorkflowError> {
        self.store.upsert_workflow(record).await.map_err(store_err)?;
        tracing::debug!(
            workflow_id = %record.workflow_id,
            status = %record.status,
            "saved workflow metadata"
        );
        Ok(())
    }

    pub async fn load_status(&self, workflow_id: &str) -> Result<WorkflowStatus, WorkflowError> {
        Ok(self.load_workflow_metadata(workflow_id).await?.status)
    }

    /// Apply `event` to the stored status and write `change` with it.
    ///
    /// The legality check and the write form one compare-and-set; if another
    /// writer moves the status in between, the check is repeated against the
    /// new status. Returns the status the workflow moved from.
    pub async fn transition_status(
        &self,
        workflow_id: &str,
        event: StatusEvent,
        change: StatusChange,
    ) -> Result<WorkflowStatus, WorkflowError> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let current = self.load_status(workflow_id).await?;
            let next = transition(current, event)?;
            let update = change.clone().into_update(current, next);
            if self
                .store
                .update_status(workflow_id, &update)
                .await
                .map_err(store_err)?
            {
                tracing::debug!(
                    workflow_id,
                    from = %current,
                    to = %next,
                    %event,
                    "workflow status transition"
                );
                return Ok(current);
            }
        }
        Err(WorkflowError::Checkpoint(format!(
            "status of workflow '{workflow_id}' kept changing during {event}"
        )))
    }

    pub async fn heartbeat(&self, workflow_id: &str, owner: &str) -> Result<bool, WorkflowError> {
        self.store
            .heartbeat(workflow_id, owner, Utc::now())
            .await
            .map_err(store_err)
    }

    pub async fn list_workflows(
        &self,
        filter: &StatusFilter,
    ) -> Result<Vec<(String, WorkflowStatus)>, WorkflowError> {
        let statuses: Vec<WorkflowStatus> = filter.resolve().into_iter().collect();
        self.store.list_workflows(&statuses).await.map_err(store_err)
    }

    /// Remove every record of a workflow. Refused while it is RUNNING.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        match self.store.delete_workflow(workflow_id).await.map_err(store_err)? {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::NotFound => {
                return Err(WorkflowError::NotFound(workflow_id.to_string()));
            }
            DeleteOutcome::Running => {
                return Err(WorkflowError::Running {
                    operation: "delete".to_string(),
                    workflow_id: workflow_id.to_string(),
                });
            }
        }
        tracing::debug!(workflow_id, "deleted workflow checkpoints");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task checkpoints
    // -----------------------------------------------------------------------

    pub async fn load_task_record(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<TaskCheckpoint>, WorkflowError> {
        self.store
            .get_task(workflow_id, task_name)
            .await
            .map_err(store_err)
    }

    pub async fn load_task_output(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<TaskOutput, WorkflowError> {
        match self.load_task_record(workflow_id, task_name).await? {
            None => Ok(TaskOutput::NotPersisted),
            Some(record) => self.task_output_of(&record),
        }
    }

    fn task_output_of(&self, record: &TaskCheckpoint) -> Result<TaskOutput, WorkflowError> {
        match (record.status, &record.output) {
            (TaskStatus::Successful, Some(bytes)) => Ok(TaskOutput::Committed(self.decode(bytes)?)),
            (TaskStatus::Successful, None) => Ok(TaskOutput::Committed(Value::Null)),
            (TaskStatus::Failed, _) => Ok(TaskOutput::Failed(
                record.error.clone().unwrap_or_default(),
            )),
        }
    }

    /// Decoded outputs of every committed task of a workflow.
    pub async fn committed_outputs(
        &self,
        workflow_id: &str,
    ) -> Result<HashMap<String, Value>, WorkflowError> {
        let records = self.store.list_tasks(workflow_id).await.map_err(store_err)?;
        let mut outputs = HashMap::new();
        for record in records {
            if let TaskOutput::Committed(value) = self.task_output_of(&record)? {
                outputs.insert(record.task_name, value);
            }
        }
        Ok(outputs)
    }

    /// Persist a task result.
    ///
    /// `Ok(value)` writes a SUCCESSFUL record, `Err(message)` a FAILED one.
    /// Returns `false` if a SUCCESSFUL record already existed, in which case
    /// nothing was written.
    pub async fn save_task_output(
        &self,
        workflow_id: &str,
        task_name: &str,
        outcome: Result<&Value, &str>,
        inputs: &[Value],
        stats: TaskStats,
    ) -> Result<bool, WorkflowError> {
        let input = self.encode(&Value::Array(inputs.to_vec()))?;
        let (status, output, error) = match outcome {
            Ok(value) => (TaskStatus::Successful, Some(self.encode(value)?), None),
            Err(message) => (TaskStatus::Failed, None, Some(message.to_string())),
        };
        let checkpoint = TaskCheckpoint {
            workflow_id: workflow_id.to_string(),
            task_name: task_name.to_string(),
            status,
            input,
            output,
            error,
            stats,
        };

        let written = self.store.commit_task(&checkpoint).await.map_err(store_err)?;
        tracing::debug!(
            workflow_id,
            task = task_name,
            status = %status,
            retry_count = checkpoint.stats.retry_count,
            written,
            "checkpointed task output"
        );
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Event records
    // -----------------------------------------------------------------------

    pub async fn load_event(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<EventRecord>, WorkflowError> {
        self.store
            .get_event(workflow_id, task_name)
            .await
            .map_err(store_err)
    }

    /// Record that an event node started polling. A COMMITTED record is
    /// returned as-is and never downgraded.
    pub async fn record_event_waiting(
        &self,
        workflow_id: &str,
        task_name: &str,
        listener: &str,
    ) -> Result<EventRecord, WorkflowError> {
        if let Some(existing) = self.load_event(workflow_id, task_name).await? {
            return Ok(existing);
        }
        let record = EventRecord {
            workflow_id: workflow_id.to_string(),
            task_name: task_name.to_string(),
            listener: listener.to_string(),
            state: EventState::Waiting,
            payload: None,
            created_at: Utc::now(),
            committed_at: None,
            acknowledged_at: None,
        };
        self.store.put_event(&record).await.map_err(store_err)?;
        tracing::debug!(workflow_id, task = task_name, listener, "event waiting");
        Ok(record)
    }

    /// Durably commit an event payload. Only after this returns may the
    /// event source be acknowledged.
    pub async fn commit_event(
        &self,
        mut record: EventRecord,
        payload: &Value,
    ) -> Result<EventRecord, WorkflowError> {
        record.state = EventState::Committed;
        record.payload = Some(self.encode(payload)?);
        record.committed_at = Some(Utc::now());
        self.store.put_event(&record).await.map_err(store_err)?;
        tracing::debug!(
            workflow_id = %record.workflow_id,
            task = %record.task_name,
            "event committed"
        );
        Ok(record)
    }

    pub async fn mark_event_acknowledged(
        &self,
        mut record: EventRecord,
    ) -> Result<EventRecord, WorkflowError> {
        record.acknowledged_at = Some(Utc::now());
        self.store.put_event(&record).await.map_err(store_err)?;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

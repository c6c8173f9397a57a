//! Event bridge: resolves an event node exactly once.
//!
//! Each event node moves through a two-stage record:
//!
//! 1. **WAITING** -- the intent is recorded and the listener is polled.
//! 2. **COMMITTED** -- the payload is durable. Only now is the listener told
//!    (`event_checkpointed`), after which `acknowledged_at` is stamped.
//!
//! A restart that finds WAITING polls again. A restart that finds COMMITTED
//! returns the stored payload without polling and re-sends the
//! acknowledgment if it was never recorded.

use std::sync::Arc;

use keelson_types::error::WorkflowError;
use keelson_types::status::EventState;
use keelson_types::workflow::EventRecord;
use serde_json::Value;

use super::listener::{EventListener, ListenerRegistry};
use crate::repository::checkpoint::CheckpointStore;
use crate::workflow::checkpoint::CheckpointManager;

pub struct EventBridge<S: CheckpointStore> {
    checkpoint: Arc<CheckpointManager<S>>,
    listeners: ListenerRegistry,
}

impl<S: CheckpointStore> EventBridge<S> {
    pub fn new(checkpoint: Arc<CheckpointManager<S>>, listeners: ListenerRegistry) -> Self {
        Self {
            checkpoint,
            listeners,
        }
    }

    pub fn has_listener(&self, key: &str) -> bool {
        self.listeners.contains(key)
    }

    /// Produce the event value for `task_name`, polling `listener_key` only
    /// if no committed payload exists yet.
    ///
    /// A failed poll comes back as `TaskExecution`.
    pub async fn resolve(
        &self,
        workflow_id: &str,
        task_name: &str,
        listener_key: &str,
        args: Vec<Value>,
    ) -> Result<Value, WorkflowError> {
        let listener = self
            .listeners
            .get(listener_key)
            .ok_or_else(|| WorkflowError::UnknownListener(listener_key.to_string()))?;

        let record = self
            .checkpoint
            .record_event_waiting(workflow_id, task_name, listener_key)
            .await?;

        if record.state == EventState::Committed {
            let payload = self.stored_payload(&record)?;
            if record.acknowledged_at.is_none() {
                tracing::info!(workflow_id, task = task_name, "re-sending event acknowledgment");
                self.acknowledge(listener.as_ref(), record, &payload).await?;
            }
            return Ok(payload);
        }

        tracing::debug!(workflow_id, task = task_name, listener = listener_key, "polling for event");
        let payload = listener
            .poll_for_event(args)
            .await
            .map_err(|failure| WorkflowError::TaskExecution {
                task_name: task_name.to_string(),
                attempts: 1,
                error: failure.message,
            })?;

        let record = self.checkpoint.commit_event(record, &payload).await?;
        self.acknowledge(listener.as_ref(), record, &payload).await?;
        Ok(payload)
    }

    fn stored_payload(&self, record: &EventRecord) -> Result<Value, WorkflowError> {
        match &record.payload {
            Some(bytes) => self.checkpoint.decode(bytes),
            None => Ok(Value::Null),
        }
    }

    /// Notify the listener, then stamp the record. A listener error leaves
    /// the stamp unset so the next resolve retries the acknowledgment.
    async fn acknowledge(
        &self,
        listener: &dyn EventListener,
        record: EventRecord,
        payload: &Value,
    ) -> Result<(), WorkflowError> {
        match listener.event_checkpointed(payload).await {
            Ok(()) => {
                self.checkpoint.mark_event_acknowledged(record).await?;
            }
            Err(failure) => {
                tracing::warn!(
                    workflow_id = %record.workflow_id,
                    task = %record.task_name,
                    error = %failure,
                    "event acknowledgment failed"
                );
            }
        }
        Ok(())
    }
}

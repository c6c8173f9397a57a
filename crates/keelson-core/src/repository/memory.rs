//! In-memory `CheckpointStore`.
//!
//! Durable only for the lifetime of the process. Clones share state, which
//! lets tests hand the same store to a second manager to simulate a restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keelson_types::error::RepositoryError;
use keelson_types::status::{TaskStatus, WorkflowStatus};
use keelson_types::workflow::{EventRecord, TaskCheckpoint, WorkflowRecord};
use tokio::sync::RwLock;

use super::checkpoint::{CheckpointStore, DeleteOutcome, StatusUpdate};

type TaskKey = (String, String);

#[derive(Default)]
struct State {
    workflows: HashMap<String, WorkflowRecord>,
    tasks: HashMap<TaskKey, TaskCheckpoint>,
    events: HashMap<TaskKey, EventRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointStore").finish_non_exhaustive()
    }
}

fn key(workflow_id: &str, task_name: &str) -> TaskKey {
    (workflow_id.to_string(), task_name.to_string())
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn upsert_workflow(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .workflows
            .insert(record.workflow_id.clone(), record.clone());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, RepositoryError> {
        Ok(self.state.read().await.workflows.get(workflow_id).cloned())
    }

    async fn update_status(
        &self,
        workflow_id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.workflows.get_mut(workflow_id) {
            Some(record) if record.status == update.from => {
                update.apply_to(record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn heartbeat(
        &self,
        workflow_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.workflows.get_mut(workflow_id) {
            Some(record)
                if record.status == WorkflowStatus::Running
                    && record.owner.as_deref() == Some(owner) =>
            {
                record.heartbeat_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_workflows(
        &self,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<(String, WorkflowStatus)>, RepositoryError> {
        let state = self.state.read().await;
        let mut matching: Vec<&WorkflowRecord> = state
            .workflows
            .values()
            .filter(|r| statuses.contains(&r.status))
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        Ok(matching
            .into_iter()
            .map(|r| (r.workflow_id.clone(), r.status))
            .collect())
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<DeleteOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        match state.workflows.get(workflow_id) {
            None => return Ok(DeleteOutcome::NotFound),
            Some(record) if record.status == WorkflowStatus::Running => {
                return Ok(DeleteOutcome::Running);
            }
            Some(_) => {}
        }
        state.workflows.remove(workflow_id);
        state.tasks.retain(|(wid, _), _| wid != workflow_id);
        state.events.retain(|(wid, _), _| wid != workflow_id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn get_task(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<TaskCheckpoint>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&key(workflow_id, task_name)).cloned())
    }

    async fn commit_task(&self, checkpoint: &TaskCheckpoint) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let k = key(&checkpoint.workflow_id, &checkpoint.task_name);
        if let Some(existing) = state.tasks.get(&k) {
            if existing.status == TaskStatus::Successful {
                return Ok(false);
            }
        }
        state.tasks.insert(k, checkpoint.clone());
        Ok(true)
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<TaskCheckpoint>, RepositoryError> {
        let state = self.state.read().await;
        let mut tasks: Vec<TaskCheckpoint> = state
            .tasks
            .values()
            .filter(|t| t.workflow_id == workflow_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(tasks)
    }

    async fn put_event(&self, record: &EventRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .events
            .insert(key(&record.workflow_id, &record.task_name), record.clone());
        Ok(())
    }

    async fn get_event(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<EventRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.events.get(&key(workflow_id, task_name)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_types::workflow::{TaskNode, TaskStats, WorkflowGraph, WorkflowInput};

    fn record(id: &str, status: WorkflowStatus) -> WorkflowRecord {
        WorkflowRecord {
            workflow_id: id.to_string(),
            status,
            graph: WorkflowGraph::from_nodes(vec![TaskNode::function("a", "identity")]),
            input: WorkflowInput::default(),
            user_metadata: Default::default(),
            owner: None,
            heartbeat_at: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    fn checkpoint(wid: &str, task: &str, status: TaskStatus, output: &[u8]) -> TaskCheckpoint {
        let now = Utc::now();
        TaskCheckpoint {
            workflow_id: wid.to_string(),
            task_name: task.to_string(),
            status,
            input: b"[]".to_vec(),
            output: Some(output.to_vec()),
            error: None,
            stats: TaskStats {
                start_time: now,
                end_time: now,
                retry_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let store = InMemoryCheckpointStore::new();
        store
            .upsert_workflow(&record("wf", WorkflowStatus::Running))
            .await
            .unwrap();

        let stale = StatusUpdate::new(WorkflowStatus::Resumable, WorkflowStatus::Running);
        assert!(!store.update_status("wf", &stale).await.unwrap());

        let mut finish = StatusUpdate::new(WorkflowStatus::Running, WorkflowStatus::Successful);
        finish.output = Some(b"3".to_vec());
        assert!(store.update_status("wf", &finish).await.unwrap());

        let stored = store.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Successful);
        assert_eq!(stored.output.as_deref(), Some(&b"3"[..]));
    }

    #[tokio::test]
    async fn test_successful_task_checkpoint_is_write_once() {
        let store = InMemoryCheckpointStore::new();
        let failed = checkpoint("wf", "a", TaskStatus::Failed, b"null");
        assert!(store.commit_task(&failed).await.unwrap());

        let first = checkpoint("wf", "a", TaskStatus::Successful, b"1");
        assert!(store.commit_task(&first).await.unwrap());

        let second = checkpoint("wf", "a", TaskStatus::Successful, b"2");
        assert!(!store.commit_task(&second).await.unwrap());

        let stored = store.get_task("wf", "a").await.unwrap().unwrap();
        assert_eq!(stored.output.as_deref(), Some(&b"1"[..]));
    }

    #[tokio::test]
    async fn test_delete_removes_task_records() {
        let store = InMemoryCheckpointStore::new();
        store
            .upsert_workflow(&record("wf", WorkflowStatus::Failed))
            .await
            .unwrap();
        store
            .commit_task(&checkpoint("wf", "a", TaskStatus::Successful, b"1"))
            .await
            .unwrap();

        assert_eq!(
            store.delete_workflow("wf").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(store.get_task("wf", "a").await.unwrap().is_none());
        assert_eq!(
            store.delete_workflow("wf").await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_refuses_running_workflow() {
        let store = InMemoryCheckpointStore::new();
        store
            .upsert_workflow(&record("wf", WorkflowStatus::Running))
            .await
            .unwrap();
        store
            .commit_task(&checkpoint("wf", "a", TaskStatus::Successful, b"1"))
            .await
            .unwrap();

        assert_eq!(
            store.delete_workflow("wf").await.unwrap(),
            DeleteOutcome::Running
        );
        let stored = store.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert!(store.get_task("wf", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_requires_matching_owner() {
        let store = InMemoryCheckpointStore::new();
        let mut rec = record("wf", WorkflowStatus::Running);
        rec.owner = Some("node-a".to_string());
        store.upsert_workflow(&rec).await.unwrap();

        assert!(!store.heartbeat("wf", "node-b", Utc::now()).await.unwrap());
        assert!(store.heartbeat("wf", "node-a", Utc::now()).await.unwrap());
    }
}

//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `keelson-core` using sqlx with split
//! read/write pools. Graphs, inputs and user metadata are stored as JSON
//! text; task outputs, event payloads and workflow outputs are stored as the
//! codec bytes they arrive as. Status changes are compare-and-set `UPDATE`s
//! and SUCCESSFUL task rows are never overwritten.

use chrono::{DateTime, SecondsFormat, Utc};
use keelson_core::repository::checkpoint::{CheckpointStore, DeleteOutcome, StatusUpdate};
use keelson_types::error::RepositoryError;
use keelson_types::status::{EventState, TaskStatus, WorkflowStatus};
use keelson_types::workflow::{EventRecord, TaskCheckpoint, TaskStats, WorkflowRecord};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    workflow_id: String,
    status: String,
    graph: String,
    input: String,
    user_metadata: String,
    owner: Option<String>,
    heartbeat_at: Option<String>,
    output: Option<Vec<u8>>,
    error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            graph: row.try_get("graph")?,
            input: row.try_get("input")?,
            user_metadata: row.try_get("user_metadata")?,
            owner: row.try_get("owner")?,
            heartbeat_at: row.try_get("heartbeat_at")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    fn into_record(self) -> Result<WorkflowRecord, RepositoryError> {
        Ok(WorkflowRecord {
            status: parse_status(&self.status)?,
            graph: parse_json(&self.graph, "graph")?,
            input: parse_json(&self.input, "input")?,
            user_metadata: parse_json(&self.user_metadata, "user_metadata")?,
            owner: self.owner,
            heartbeat_at: parse_optional_datetime(self.heartbeat_at.as_deref())?,
            output: self.output,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            ended_at: parse_optional_datetime(self.ended_at.as_deref())?,
            workflow_id: self.workflow_id,
        })
    }
}

struct TaskRow {
    workflow_id: String,
    task_name: String,
    status: String,
    input: Vec<u8>,
    output: Option<Vec<u8>>,
    error: Option<String>,
    start_time: String,
    end_time: String,
    retry_count: i64,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            task_name: row.try_get("task_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            retry_count: row.try_get("retry_count")?,
        })
    }

    fn into_checkpoint(self) -> Result<TaskCheckpoint, RepositoryError> {
        let status: TaskStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| RepositoryError::Query(format!("invalid retry_count: {}", self.retry_count)))?;

        Ok(TaskCheckpoint {
            workflow_id: self.workflow_id,
            task_name: self.task_name,
            status,
            input: self.input,
            output: self.output,
            error: self.error,
            stats: TaskStats {
                start_time: parse_datetime(&self.start_time)?,
                end_time: parse_datetime(&self.end_time)?,
                retry_count,
            },
        })
    }
}

struct EventRow {
    workflow_id: String,
    task_name: String,
    listener: String,
    state: String,
    payload: Option<Vec<u8>>,
    created_at: String,
    committed_at: Option<String>,
    acknowledged_at: Option<String>,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            task_name: row.try_get("task_name")?,
            listener: row.try_get("listener")?,
            state: row.try_get("state")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            committed_at: row.try_get("committed_at")?,
            acknowledged_at: row.try_get("acknowledged_at")?,
        })
    }

    fn into_record(self) -> Result<EventRecord, RepositoryError> {
        let state: EventState = self
            .state
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(EventRecord {
            workflow_id: self.workflow_id,
            task_name: self.task_name,
            listener: self.listener,
            state,
            payload: self.payload,
            created_at: parse_datetime(&self.created_at)?,
            committed_at: parse_optional_datetime(self.committed_at.as_deref())?,
            acknowledged_at: parse_optional_datetime(self.acknowledged_at.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_status(s: &str) -> Result<WorkflowStatus, RepositoryError> {
    s.parse::<WorkflowStatus>()
        .map_err(|e| RepositoryError::Query(format!("invalid workflow status: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, column: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize {column}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width so that `ORDER BY` on the text column sorts chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

const WORKFLOW_COLUMNS: &str = "workflow_id, status, graph, input, user_metadata, owner, \
     heartbeat_at, output, error, created_at, started_at, ended_at";

const TASK_COLUMNS: &str =
    "workflow_id, task_name, status, input, output, error, start_time, end_time, retry_count";

const EVENT_COLUMNS: &str =
    "workflow_id, task_name, listener, state, payload, created_at, committed_at, acknowledged_at";

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn upsert_workflow(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        let graph = to_json(&record.graph, "graph")?;
        let input = to_json(&record.input, "input")?;
        let user_metadata = to_json(&record.user_metadata, "user_metadata")?;

        sqlx::query(
            r#"INSERT INTO workflows
               (workflow_id, status, graph, input, user_metadata, owner, heartbeat_at,
                output, error, created_at, started_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id) DO UPDATE SET
                 status = excluded.status,
                 graph = excluded.graph,
                 input = excluded.input,
                 user_metadata = excluded.user_metadata,
                 owner = excluded.owner,
                 heartbeat_at = excluded.heartbeat_at,
                 output = excluded.output,
                 error = excluded.error,
                 created_at = excluded.created_at,
                 started_at = excluded.started_at,
                 ended_at = excluded.ended_at"#,
        )
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(&graph)
        .bind(&input)
        .bind(&user_metadata)
        .bind(&record.owner)
        .bind(record.heartbeat_at.as_ref().map(format_datetime))
        .bind(&record.output)
        .bind(&record.error)
        .bind(format_datetime(&record.created_at))
        .bind(record.started_at.as_ref().map(format_datetime))
        .bind(record.ended_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = ?"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        workflow_id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflows SET
                 status = ?,
                 owner = ?,
                 error = ?,
                 ended_at = ?,
                 heartbeat_at = ?,
                 output = COALESCE(?, output),
                 started_at = COALESCE(?, started_at)
               WHERE workflow_id = ? AND status = ?"#,
        )
        .bind(update.to.as_str())
        .bind(&update.owner)
        .bind(&update.error)
        .bind(update.ended_at.as_ref().map(format_datetime))
        .bind(update.heartbeat_at.as_ref().map(format_datetime))
        .bind(&update.output)
        .bind(update.started_at.as_ref().map(format_datetime))
        .bind(workflow_id)
        .bind(update.from.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(
        &self,
        workflow_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflows SET heartbeat_at = ? WHERE workflow_id = ? AND status = ? AND owner = ?",
        )
        .bind(format_datetime(&at))
        .bind(workflow_id)
        .bind(WorkflowStatus::Running.as_str())
        .bind(owner)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_workflows(
        &self,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<(String, WorkflowStatus)>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT workflow_id, status FROM workflows WHERE status IN ({placeholders}) \
             ORDER BY created_at ASC, workflow_id ASC"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut listed = Vec::with_capacity(rows.len());
        for row in &rows {
            let workflow_id: String = row.try_get("workflow_id").map_err(query_error)?;
            let status: String = row.try_get("status").map_err(query_error)?;
            listed.push((workflow_id, parse_status(&status)?));
        }
        Ok(listed)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<DeleteOutcome, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        // A RUNNING row is never purged.
        let result = sqlx::query("DELETE FROM workflows WHERE workflow_id = ? AND status != ?")
            .bind(workflow_id)
            .bind(WorkflowStatus::Running.as_str())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM workflows WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error)?
                .is_some();
            tx.rollback().await.map_err(query_error)?;
            return Ok(if exists {
                DeleteOutcome::Running
            } else {
                DeleteOutcome::NotFound
            });
        }

        sqlx::query("DELETE FROM workflow_events WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        sqlx::query("DELETE FROM task_checkpoints WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn get_task(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<TaskCheckpoint>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_checkpoints WHERE workflow_id = ? AND task_name = ?"
        ))
        .bind(workflow_id)
        .bind(task_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = TaskRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn commit_task(&self, checkpoint: &TaskCheckpoint) -> Result<bool, RepositoryError> {
        // The WHERE on the conflict branch keeps SUCCESSFUL rows write-once.
        let result = sqlx::query(
            r#"INSERT INTO task_checkpoints
               (workflow_id, task_name, status, input, output, error, start_time, end_time, retry_count)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id, task_name) DO UPDATE SET
                 status = excluded.status,
                 input = excluded.input,
                 output = excluded.output,
                 error = excluded.error,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 retry_count = excluded.retry_count
               WHERE task_checkpoints.status != ?"#,
        )
        .bind(&checkpoint.workflow_id)
        .bind(&checkpoint.task_name)
        .bind(checkpoint.status.as_str())
        .bind(&checkpoint.input)
        .bind(&checkpoint.output)
        .bind(&checkpoint.error)
        .bind(format_datetime(&checkpoint.stats.start_time))
        .bind(format_datetime(&checkpoint.stats.end_time))
        .bind(i64::from(checkpoint.stats.retry_count))
        .bind(TaskStatus::Successful.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<TaskCheckpoint>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_checkpoints WHERE workflow_id = ? ORDER BY task_name ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = TaskRow::from_row(row).map_err(query_error)?;
            tasks.push(r.into_checkpoint()?);
        }
        Ok(tasks)
    }

    async fn put_event(&self, record: &EventRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_events
               (workflow_id, task_name, listener, state, payload, created_at, committed_at, acknowledged_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id, task_name) DO UPDATE SET
                 listener = excluded.listener,
                 state = excluded.state,
                 payload = excluded.payload,
                 created_at = excluded.created_at,
                 committed_at = excluded.committed_at,
                 acknowledged_at = excluded.acknowledged_at"#,
        )
        .bind(&record.workflow_id)
        .bind(&record.task_name)
        .bind(&record.listener)
        .bind(record.state.as_str())
        .bind(&record.payload)
        .bind(format_datetime(&record.created_at))
        .bind(record.committed_at.as_ref().map(format_datetime))
        .bind(record.acknowledged_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_event(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Option<EventRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM workflow_events WHERE workflow_id = ? AND task_name = ?"
        ))
        .bind(workflow_id)
        .bind(task_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = EventRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keelson_types::workflow::{TaskNode, WorkflowGraph, WorkflowInput};
    use serde_json::json;

    async fn test_store() -> SqliteCheckpointStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteCheckpointStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn sample_workflow(id: &str, status: WorkflowStatus) -> WorkflowRecord {
        let mut user_metadata = serde_json::Map::new();
        user_metadata.insert("team".to_string(), json!("data"));
        WorkflowRecord {
            workflow_id: id.to_string(),
            status,
            graph: WorkflowGraph::from_nodes(vec![
                TaskNode::function("a", "identity").input(0),
                TaskNode::function("b", "sum").upstream("a").arg(json!(1)),
            ]),
            input: WorkflowInput::args(vec![json!(41)]),
            user_metadata,
            owner: Some("instance-1".to_string()),
            heartbeat_at: Some(Utc::now()),
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: None,
        }
    }

    fn sample_task(workflow_id: &str, name: &str, status: TaskStatus, output: &[u8]) -> TaskCheckpoint {
        TaskCheckpoint {
            workflow_id: workflow_id.to_string(),
            task_name: name.to_string(),
            status,
            input: b"[41]".to_vec(),
            output: (status == TaskStatus::Successful).then(|| output.to_vec()),
            error: (status == TaskStatus::Failed).then(|| "boom".to_string()),
            stats: TaskStats {
                start_time: Utc::now(),
                end_time: Utc::now(),
                retry_count: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_workflow() {
        let store = test_store().await;
        let record = sample_workflow("wf-1", WorkflowStatus::Running);
        store.upsert_workflow(&record).await.unwrap();

        let loaded = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Running);
        assert_eq!(loaded.graph, record.graph);
        assert_eq!(loaded.input.args, vec![json!(41)]);
        assert_eq!(loaded.user_metadata["team"], json!("data"));
        assert_eq!(loaded.owner.as_deref(), Some("instance-1"));
        assert!(loaded.output.is_none());

        assert!(store.get_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Running))
            .await
            .unwrap();

        let mut done = StatusUpdate::new(WorkflowStatus::Running, WorkflowStatus::Successful);
        done.output = Some(b"42".to_vec());
        done.ended_at = Some(Utc::now());
        assert!(store.update_status("wf-1", &done).await.unwrap());

        // A stale `from` no longer matches.
        let cancel = StatusUpdate::new(WorkflowStatus::Running, WorkflowStatus::Canceled);
        assert!(!store.update_status("wf-1", &cancel).await.unwrap());

        let loaded = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Successful);
        assert_eq!(loaded.output.as_deref(), Some(b"42".as_slice()));
        assert!(loaded.owner.is_none());
        assert!(loaded.ended_at.is_some());
        // started_at is kept when the update carries none.
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_requires_running_owner() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Running))
            .await
            .unwrap();

        let later = Utc::now() + Duration::seconds(10);
        assert!(store.heartbeat("wf-1", "instance-1", later).await.unwrap());
        assert!(!store.heartbeat("wf-1", "someone-else", later).await.unwrap());

        let loaded = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(
            format_datetime(&loaded.heartbeat_at.unwrap()),
            format_datetime(&later)
        );
    }

    #[tokio::test]
    async fn test_list_workflows_filters_and_orders_by_creation() {
        let store = test_store().await;
        let base = Utc::now();
        for (i, (id, status)) in [
            ("c", WorkflowStatus::Failed),
            ("a", WorkflowStatus::Resumable),
            ("b", WorkflowStatus::Successful),
        ]
        .into_iter()
        .enumerate()
        {
            let mut record = sample_workflow(id, status);
            record.created_at = base + Duration::seconds(i as i64);
            store.upsert_workflow(&record).await.unwrap();
        }

        let listed = store
            .list_workflows(&[WorkflowStatus::Failed, WorkflowStatus::Resumable])
            .await
            .unwrap();
        assert_eq!(
            listed,
            vec![
                ("c".to_string(), WorkflowStatus::Failed),
                ("a".to_string(), WorkflowStatus::Resumable),
            ]
        );
        assert!(store.list_workflows(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_task_is_write_once() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Running))
            .await
            .unwrap();

        // A FAILED record may be replaced by a later attempt.
        let failed = sample_task("wf-1", "a", TaskStatus::Failed, b"");
        assert!(store.commit_task(&failed).await.unwrap());
        let first = sample_task("wf-1", "a", TaskStatus::Successful, b"1");
        assert!(store.commit_task(&first).await.unwrap());

        let second = sample_task("wf-1", "a", TaskStatus::Successful, b"2");
        assert!(!store.commit_task(&second).await.unwrap());

        let loaded = store.get_task("wf-1", "a").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Successful);
        assert_eq!(loaded.output.as_deref(), Some(b"1".as_slice()));
        assert_eq!(loaded.stats.retry_count, 2);
        assert!(loaded.error.is_none());

        assert_eq!(store.list_tasks("wf-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_event_record_round_trip_and_update() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Running))
            .await
            .unwrap();

        let mut record = EventRecord {
            workflow_id: "wf-1".to_string(),
            task_name: "wait".to_string(),
            listener: "timer".to_string(),
            state: EventState::Waiting,
            payload: None,
            created_at: Utc::now(),
            committed_at: None,
            acknowledged_at: None,
        };
        store.put_event(&record).await.unwrap();
        assert_eq!(
            store.get_event("wf-1", "wait").await.unwrap().unwrap().state,
            EventState::Waiting
        );

        record.state = EventState::Committed;
        record.payload = Some(b"{\"end_time\":1.0}".to_vec());
        record.committed_at = Some(Utc::now());
        store.put_event(&record).await.unwrap();

        let loaded = store.get_event("wf-1", "wait").await.unwrap().unwrap();
        assert_eq!(loaded.state, EventState::Committed);
        assert_eq!(loaded.payload, record.payload);
        assert!(loaded.acknowledged_at.is_none());
    }

    #[tokio::test]
    async fn test_delete_workflow_removes_all_records() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Successful))
            .await
            .unwrap();
        store
            .commit_task(&sample_task("wf-1", "a", TaskStatus::Successful, b"1"))
            .await
            .unwrap();

        assert_eq!(
            store.delete_workflow("wf-1").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(store.get_workflow("wf-1").await.unwrap().is_none());
        assert!(store.get_task("wf-1", "a").await.unwrap().is_none());
        assert_eq!(
            store.delete_workflow("wf-1").await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_workflow_refuses_running() {
        let store = test_store().await;
        store
            .upsert_workflow(&sample_workflow("wf-1", WorkflowStatus::Running))
            .await
            .unwrap();
        store
            .commit_task(&sample_task("wf-1", "a", TaskStatus::Successful, b"1"))
            .await
            .unwrap();

        assert_eq!(
            store.delete_workflow("wf-1").await.unwrap(),
            DeleteOutcome::Running
        );
        let stored = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert!(store.get_task("wf-1", "a").await.unwrap().is_some());

        let done = StatusUpdate::new(WorkflowStatus::Running, WorkflowStatus::Successful);
        assert!(store.update_status("wf-1", &done).await.unwrap());
        assert_eq!(
            store.delete_workflow("wf-1").await.unwrap(),
            DeleteOutcome::Deleted
        );
    }
}

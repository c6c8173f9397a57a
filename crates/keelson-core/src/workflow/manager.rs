//! Workflow manager: the coordinator behind every public workflow operation.
//!
//! Tracks the runs active in this process, starts and resumes runs on the
//! tokio runtime, and answers status, metadata and output queries from the
//! checkpoint store. Every status change goes through the status machine
//! with compare-and-set, so a cancel issued while a run is finishing wins
//! over the run's own final write.
//!
//! Each manager has an instance id stamped on the RUNNING records it owns
//! and refreshed by a heartbeat. On startup, `recover_interrupted` marks
//! RUNNING records whose owner is gone as RESUMABLE.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keelson_types::config::EngineConfig;
use keelson_types::error::WorkflowError;
use keelson_types::event::RunEvent;
use keelson_types::status::{StatusEvent, StatusFilter, WorkflowStatus};
use keelson_types::workflow::{
    Metadata, TaskMetadata, WorkflowGraph, WorkflowInput, WorkflowMetadata, WorkflowRecord,
    WorkflowStats, validate_user_metadata,
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::{CheckpointManager, StatusChange, TaskOutput};
use super::executor::TaskExecutor;
use super::status::{initial_status, transition};
use super::walker::GraphWalker;
use crate::codec::{Codec, JsonCodec};
use crate::event::bus::EventBus;
use crate::event::listener::ListenerRegistry;
use crate::repository::checkpoint::CheckpointStore;
use crate::runtime::{LocalRuntime, TaskRegistry, TaskRuntime};

// ---------------------------------------------------------------------------
// Options and requests
// ---------------------------------------------------------------------------

/// Everything a manager is built from besides its store.
pub struct EngineOptions {
    pub config: EngineConfig,
    pub registry: TaskRegistry,
    pub listeners: ListenerRegistry,
    /// Defaults to a `LocalRuntime` bounded by `config.max_concurrent_tasks`.
    pub runtime: Option<Arc<dyn TaskRuntime>>,
    /// Defaults to `JsonCodec`.
    pub codec: Option<Arc<dyn Codec>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: TaskRegistry::with_builtins(),
            listeners: ListenerRegistry::with_builtins(),
            runtime: None,
            codec: None,
        }
    }
}

impl EngineOptions {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn TaskRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }
}

/// A request to run a graph.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub graph: WorkflowGraph,
    pub input: WorkflowInput,
    /// Generated (UUIDv7) when absent. An existing id is resumed.
    pub workflow_id: Option<String>,
    /// Workflow-level user metadata; must be a JSON object.
    pub metadata: Option<Value>,
}

impl RunRequest {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            input: WorkflowInput::default(),
            workflow_id: None,
            metadata: None,
        }
    }

    pub fn with_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_input(mut self, input: WorkflowInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.input.args = args;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

enum HandleState {
    Running(JoinHandle<Result<Value, WorkflowError>>),
    Ready(Result<Value, WorkflowError>),
}

/// The future of one workflow run.
pub struct WorkflowHandle {
    workflow_id: String,
    state: HandleState,
}

impl WorkflowHandle {
    fn ready(workflow_id: String, result: Result<Value, WorkflowError>) -> Self {
        Self {
            workflow_id,
            state: HandleState::Ready(result),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The sink output, or the error that stopped the run.
    pub async fn result(self) -> Result<Value, WorkflowError> {
        match self.state {
            HandleState::Ready(result) => result,
            HandleState::Running(join) => match join.await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::Interrupted(self.workflow_id)),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Running(join) => join.is_finished(),
        }
    }

    /// Kill the driving task without recording anything, as a crash of
    /// this process would.
    pub fn abort(&self) {
        if let HandleState::Running(join) = &self.state {
            join.abort();
        }
    }
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Active runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancel,
    Interrupt,
}

struct ActiveRun {
    token: CancellationToken,
    stop: Arc<OnceLock<StopReason>>,
}

type ActiveRuns = Arc<DashMap<String, ActiveRun>>;

/// Owns a slot in the active-run map and frees it when dropped, which also
/// covers a driving task that is aborted.
struct ActiveSlot {
    active: ActiveRuns,
    workflow_id: String,
    token: CancellationToken,
    stop: Arc<OnceLock<StopReason>>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active.remove(&self.workflow_id);
    }
}

// ---------------------------------------------------------------------------
// WorkflowManager
// ---------------------------------------------------------------------------

pub struct WorkflowManager<S: CheckpointStore> {
    instance_id: String,
    config: EngineConfig,
    checkpoint: Arc<CheckpointManager<S>>,
    walker: GraphWalker<S>,
    event_bus: EventBus,
    active: ActiveRuns,
}

impl<S: CheckpointStore + 'static> WorkflowManager<S> {
    /// Build a manager without scanning for interrupted runs.
    pub fn new(store: S, options: EngineOptions) -> Self {
        let codec = options.codec.unwrap_or_else(|| Arc::new(JsonCodec));
        let runtime = options
            .runtime
            .unwrap_or_else(|| Arc::new(LocalRuntime::new(options.config.max_concurrent_tasks)));
        let checkpoint = Arc::new(CheckpointManager::new(store, codec));
        let event_bus = EventBus::default();
        let executor = Arc::new(TaskExecutor::new(
            checkpoint.clone(),
            options.registry,
            options.listeners,
            runtime,
            &options.config,
            event_bus.clone(),
        ));

        Self {
            instance_id: Uuid::now_v7().to_string(),
            config: options.config,
            walker: GraphWalker::new(checkpoint.clone(), executor),
            checkpoint,
            event_bus,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Build a manager and recover runs orphaned by a previous process.
    pub async fn start(store: S, options: EngineOptions) -> Result<Arc<Self>, WorkflowError> {
        let manager = Arc::new(Self::new(store, options));
        let recovered = manager.recover_interrupted().await?;
        tracing::info!(
            instance_id = %manager.instance_id,
            recovered = recovered.len(),
            "workflow manager started"
        );
        Ok(manager)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn is_active(&self, workflow_id: &str) -> bool {
        self.active.contains_key(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Run / resume
    // -----------------------------------------------------------------------

    /// Run a graph to completion and return its sink output.
    pub async fn run(self: &Arc<Self>, request: RunRequest) -> Result<Value, WorkflowError> {
        self.run_async(request).await?.result().await
    }

    /// Start a run and return its handle once the RUNNING record is durable.
    ///
    /// An id that already exists is resumed instead: a SUCCESSFUL one
    /// yields its stored output without running anything.
    pub async fn run_async(
        self: &Arc<Self>,
        request: RunRequest,
    ) -> Result<WorkflowHandle, WorkflowError> {
        let user_metadata = request
            .metadata
            .as_ref()
            .map(validate_user_metadata)
            .transpose()?
            .unwrap_or_default();
        self.walker.validate(&request.graph)?;

        let workflow_id = request
            .workflow_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        if self.checkpoint.find_workflow(&workflow_id).await?.is_some() {
            tracing::info!(workflow_id = %workflow_id, "workflow exists, resuming instead");
            return self.resume_async(&workflow_id).await;
        }

        let status = transition(initial_status(), StatusEvent::Start)?;
        let slot = self.reserve(&workflow_id, "run")?;
        let now = Utc::now();
        let record = WorkflowRecord {
            workflow_id: workflow_id.clone(),
            status,
            graph: request.graph.clone(),
            input: request.input.clone(),
            user_metadata,
            owner: Some(self.instance_id.clone()),
            heartbeat_at: Some(now),
            output: None,
            error: None,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
        };
        self.checkpoint.save_workflow_metadata(&record).await?;

        Ok(self.spawn_drive(slot, request.graph, request.input, false))
    }

    pub async fn resume(self: &Arc<Self>, workflow_id: &str) -> Result<Value, WorkflowError> {
        self.resume_async(workflow_id).await?.result().await
    }

    /// Continue a RESUMABLE or FAILED workflow from its checkpoints.
    pub async fn resume_async(
        self: &Arc<Self>,
        workflow_id: &str,
    ) -> Result<WorkflowHandle, WorkflowError> {
        let mut record = self.checkpoint.load_workflow_metadata(workflow_id).await?;
        // A run whose owner died after this manager started.
        if self.recover_if_orphaned(&record).await? {
            record.status = WorkflowStatus::Resumable;
        }
        match record.status {
            WorkflowStatus::Successful => {
                let output = self.decode_output(&record);
                return Ok(WorkflowHandle::ready(workflow_id.to_string(), output));
            }
            WorkflowStatus::Running => {
                return Err(WorkflowError::Running {
                    operation: "resume".to_string(),
                    workflow_id: workflow_id.to_string(),
                });
            }
            _ => {}
        }
        transition(record.status, StatusEvent::Start)?;

        let slot = self.reserve(workflow_id, "resume")?;
        let now = Utc::now();
        let from = self
            .checkpoint
            .transition_status(
                workflow_id,
                StatusEvent::Start,
                StatusChange {
                    owner: Some(self.instance_id.clone()),
                    heartbeat_at: Some(now),
                    started_at: record.started_at.is_none().then_some(now),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(workflow_id, from = %from, "resuming workflow");

        Ok(self.spawn_drive(slot, record.graph, record.input, true))
    }

    /// Resume every RESUMABLE workflow, and FAILED ones when asked.
    ///
    /// Orphaned RUNNING workflows are recovered first. Workflows that cannot
    /// be resumed right now (for example because another process just picked
    /// them up) are skipped with a warning.
    pub async fn resume_all(
        self: &Arc<Self>,
        include_failed: bool,
    ) -> Result<Vec<WorkflowHandle>, WorkflowError> {
        self.recover_interrupted().await?;
        let mut statuses = vec![WorkflowStatus::Resumable];
        if include_failed {
            statuses.push(WorkflowStatus::Failed);
        }
        let candidates = self
            .checkpoint
            .list_workflows(&statuses.into_iter().collect())
            .await?;

        let mut handles = Vec::with_capacity(candidates.len());
        for (workflow_id, _) in candidates {
            match self.resume_async(&workflow_id).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!(workflow_id = %workflow_id, error = %e, "skipping workflow in resume_all");
                }
            }
        }
        Ok(handles)
    }

    fn reserve(&self, workflow_id: &str, operation: &str) -> Result<ActiveSlot, WorkflowError> {
        let token = CancellationToken::new();
        let stop = Arc::new(OnceLock::new());
        match self.active.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::Running {
                    operation: operation.to_string(),
                    workflow_id: workflow_id.to_string(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(ActiveRun {
                    token: token.clone(),
                    stop: stop.clone(),
                });
            }
        }
        Ok(ActiveSlot {
            active: self.active.clone(),
            workflow_id: workflow_id.to_string(),
            token,
            stop,
        })
    }

    fn spawn_drive(
        self: &Arc<Self>,
        slot: ActiveSlot,
        graph: WorkflowGraph,
        input: WorkflowInput,
        resumed: bool,
    ) -> WorkflowHandle {
        let workflow_id = slot.workflow_id.clone();
        let this = Arc::clone(self);
        let join = tokio::spawn(async move { this.drive(slot, graph, input, resumed).await });
        WorkflowHandle {
            workflow_id,
            state: HandleState::Running(join),
        }
    }

    async fn drive(
        &self,
        slot: ActiveSlot,
        graph: WorkflowGraph,
        input: WorkflowInput,
        resumed: bool,
    ) -> Result<Value, WorkflowError> {
        let workflow_id = slot.workflow_id.as_str();
        self.event_bus.publish(RunEvent::WorkflowStarted {
            workflow_id: workflow_id.to_string(),
            resumed,
        });
        tracing::info!(workflow_id, resumed, sink = %graph.sink, "workflow running");

        let result = self
            .walk_with_heartbeat(workflow_id, &graph, input, &slot.token)
            .await;
        let (status, outcome) = self
            .finish(workflow_id, result, slot.stop.get().copied())
            .await;

        tracing::info!(workflow_id, status = %status, "workflow finished");
        self.event_bus.publish(RunEvent::WorkflowFinished {
            workflow_id: workflow_id.to_string(),
            status,
        });
        drop(slot);
        outcome
    }

    async fn walk_with_heartbeat(
        &self,
        workflow_id: &str,
        graph: &WorkflowGraph,
        input: WorkflowInput,
        token: &CancellationToken,
    ) -> Result<Value, WorkflowError> {
        let walk = self.walker.walk(workflow_id, graph, input, token);
        if self.config.lease_secs == 0 {
            return walk.await;
        }

        let period = Duration::from_secs((self.config.lease_secs / 3).max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        tokio::pin!(walk);
        loop {
            tokio::select! {
                result = &mut walk => return result,
                _ = ticker.tick() => {
                    match self.checkpoint.heartbeat(workflow_id, &self.instance_id).await {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(workflow_id, "heartbeat skipped, run no longer owned"),
                        Err(e) => tracing::warn!(workflow_id, error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }

    /// Record the final status of a run and decide what its handle yields.
    ///
    /// The write is skipped when a cancel already recorded CANCELED, and a
    /// rejected transition means someone else finished the workflow first.
    async fn finish(
        &self,
        workflow_id: &str,
        result: Result<Value, WorkflowError>,
        stop: Option<StopReason>,
    ) -> (WorkflowStatus, Result<Value, WorkflowError>) {
        let now = Utc::now();
        let result = result.and_then(|value| {
            let bytes = self.checkpoint.encode(&value)?;
            Ok((value, bytes))
        });

        let final_write = match (&result, stop) {
            (_, Some(StopReason::Cancel)) => None,
            (_, Some(StopReason::Interrupt)) => {
                Some((StatusEvent::Interrupt, StatusChange::default()))
            }
            (Ok((_, bytes)), None) => Some((
                StatusEvent::Succeed,
                StatusChange {
                    output: Some(bytes.clone()),
                    ended_at: Some(now),
                    ..Default::default()
                },
            )),
            (Err(e), None) if e.is_stopped() => None,
            (Err(e), None) => Some((
                StatusEvent::Fail,
                StatusChange {
                    error: Some(e.to_string()),
                    ended_at: Some(now),
                    ..Default::default()
                },
            )),
        };

        if let Some((event, change)) = final_write {
            match self
                .checkpoint
                .transition_status(workflow_id, event, change)
                .await
            {
                Ok(_) => {}
                Err(WorkflowError::InvalidTransition { from, .. }) => {
                    tracing::debug!(workflow_id, %from, %event, "final status already decided");
                }
                Err(e) => {
                    tracing::error!(workflow_id, error = %e, "failed to record final status");
                }
            }
        }

        let status = match self.checkpoint.load_status(workflow_id).await {
            Ok(status) => status,
            Err(e) => return (WorkflowStatus::Running, Err(e)),
        };
        let outcome = match status {
            WorkflowStatus::Canceled => Err(WorkflowError::Cancelled(workflow_id.to_string())),
            WorkflowStatus::Resumable => Err(WorkflowError::Interrupted(workflow_id.to_string())),
            WorkflowStatus::Successful | WorkflowStatus::Failed => result.map(|(value, _)| value),
            other => Err(result.err().unwrap_or_else(|| {
                WorkflowError::Checkpoint(format!(
                    "workflow '{workflow_id}' finished but its status is {other}"
                ))
            })),
        };
        (status, outcome)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Workflow ids and statuses admitted by `filter`, oldest first.
    pub async fn list_all(
        &self,
        filter: &StatusFilter,
    ) -> Result<Vec<(String, WorkflowStatus)>, WorkflowError> {
        self.checkpoint.list_workflows(filter).await
    }

    pub async fn get_status(&self, workflow_id: &str) -> Result<WorkflowStatus, WorkflowError> {
        self.checkpoint.load_status(workflow_id).await
    }

    /// Workflow-level metadata, or task-level metadata when `task_name` is given.
    pub async fn get_metadata(
        &self,
        workflow_id: &str,
        task_name: Option<&str>,
    ) -> Result<Metadata, WorkflowError> {
        let record = self.checkpoint.load_workflow_metadata(workflow_id).await?;
        let Some(task_name) = task_name else {
            return Ok(Metadata::Workflow(WorkflowMetadata {
                workflow_id: record.workflow_id,
                status: record.status,
                user_metadata: record.user_metadata,
                stats: WorkflowStats {
                    start_time: record.started_at,
                    end_time: record.ended_at,
                },
                error: record.error,
            }));
        };

        let node = record
            .graph
            .node(task_name)
            .ok_or_else(|| WorkflowError::TaskNotFound {
                workflow_id: workflow_id.to_string(),
                task_name: task_name.to_string(),
            })?;
        let checkpoint = self
            .checkpoint
            .load_task_record(workflow_id, task_name)
            .await?;

        Ok(Metadata::Task(TaskMetadata {
            workflow_id: workflow_id.to_string(),
            task_name: task_name.to_string(),
            task_type: node.kind.task_type().to_string(),
            status: checkpoint.as_ref().map(|c| c.status),
            user_metadata: node.options.metadata.clone().unwrap_or_default(),
            options: node.options.clone(),
            stats: checkpoint.map(|c| c.stats),
        }))
    }

    /// The workflow output, or a task's checkpointed output.
    ///
    /// For a workflow RUNNING in this process this waits until it finishes.
    pub async fn get_output(
        &self,
        workflow_id: &str,
        task_name: Option<&str>,
    ) -> Result<Value, WorkflowError> {
        if let Some(task_name) = task_name {
            return self.get_task_output(workflow_id, task_name).await;
        }

        // Subscribe before reading so a finish between the two is not missed.
        let mut events = self.event_bus.subscribe();
        let mut rechecked = false;
        loop {
            let record = self.checkpoint.load_workflow_metadata(workflow_id).await?;
            match record.status {
                WorkflowStatus::Successful => return self.decode_output(&record),
                WorkflowStatus::Failed => {
                    return Err(WorkflowError::Failed {
                        workflow_id: workflow_id.to_string(),
                        error: record.error.unwrap_or_default(),
                    });
                }
                WorkflowStatus::Canceled => {
                    return Err(WorkflowError::Cancelled(workflow_id.to_string()));
                }
                WorkflowStatus::Running if self.is_active(workflow_id) => loop {
                    match events.recv().await {
                        Ok(RunEvent::WorkflowFinished { workflow_id: id, .. })
                            if id == workflow_id =>
                        {
                            break;
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => {
                            return Err(WorkflowError::Interrupted(workflow_id.to_string()));
                        }
                    }
                },
                // The run may have finished between the read and the check.
                WorkflowStatus::Running if !rechecked => rechecked = true,
                status => {
                    return Err(WorkflowError::OutputUnavailable(format!(
                        "workflow '{workflow_id}' is {status} and has no output"
                    )));
                }
            }
        }
    }

    async fn get_task_output(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Value, WorkflowError> {
        let record = self.checkpoint.load_workflow_metadata(workflow_id).await?;
        if record.graph.node(task_name).is_none() {
            return Err(WorkflowError::TaskNotFound {
                workflow_id: workflow_id.to_string(),
                task_name: task_name.to_string(),
            });
        }
        match self.checkpoint.load_task_output(workflow_id, task_name).await? {
            TaskOutput::Committed(value) => Ok(value),
            TaskOutput::Failed(error) => Err(WorkflowError::OutputUnavailable(format!(
                "task '{task_name}' failed: {error}"
            ))),
            TaskOutput::NotPersisted => Err(WorkflowError::OutputUnavailable(format!(
                "task '{task_name}' of workflow '{workflow_id}' has no checkpointed output"
            ))),
        }
    }

    fn decode_output(&self, record: &WorkflowRecord) -> Result<Value, WorkflowError> {
        match &record.output {
            Some(bytes) => self.checkpoint.decode(bytes),
            None => Ok(Value::Null),
        }
    }

    // -----------------------------------------------------------------------
    // Cancel / delete
    // -----------------------------------------------------------------------

    /// Mark a workflow CANCELED and stop its run if it is active here.
    /// Committed checkpoints are kept.
    pub async fn cancel(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let status = self.checkpoint.load_status(workflow_id).await?;
        transition(status, StatusEvent::Cancel)?;

        self.checkpoint
            .transition_status(
                workflow_id,
                StatusEvent::Cancel,
                StatusChange {
                    error: Some("canceled by user".to_string()),
                    ended_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        let signalled = match self.active.get(workflow_id) {
            Some(run) => {
                let _ = run.stop.set(StopReason::Cancel);
                run.token.cancel();
                true
            }
            None => false,
        };
        if !signalled {
            self.event_bus.publish(RunEvent::WorkflowFinished {
                workflow_id: workflow_id.to_string(),
                status: WorkflowStatus::Canceled,
            });
        }
        tracing::info!(workflow_id, active = signalled, "workflow canceled");
        Ok(())
    }

    /// Purge every record of a workflow that is not running.
    pub async fn delete(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        if self.is_active(workflow_id) {
            return Err(WorkflowError::Running {
                operation: "delete".to_string(),
                workflow_id: workflow_id.to_string(),
            });
        }
        self.checkpoint.delete_workflow(workflow_id).await?;
        tracing::info!(workflow_id, "workflow deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery / shutdown
    // -----------------------------------------------------------------------

    /// Mark RUNNING workflows whose owner is gone as RESUMABLE.
    ///
    /// A record is orphaned when it is not active here, is not owned by this
    /// instance, and its owner's last heartbeat is older than `lease_secs`.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, WorkflowError> {
        let running = self
            .checkpoint
            .list_workflows(&StatusFilter::from(WorkflowStatus::Running))
            .await?;

        let mut recovered = Vec::new();
        for (workflow_id, _) in running {
            let Some(record) = self.checkpoint.find_workflow(&workflow_id).await? else {
                continue;
            };
            if self.recover_if_orphaned(&record).await? {
                recovered.push(workflow_id);
            }
        }
        Ok(recovered)
    }

    /// Move one RUNNING record to RESUMABLE if its owner's lease ran out.
    async fn recover_if_orphaned(&self, record: &WorkflowRecord) -> Result<bool, WorkflowError> {
        let workflow_id = record.workflow_id.as_str();
        if record.status != WorkflowStatus::Running || self.is_active(workflow_id) {
            return Ok(false);
        }
        if record.owner.as_deref() == Some(self.instance_id.as_str()) {
            return Ok(false);
        }
        let lease_secs = i64::try_from(self.config.lease_secs).unwrap_or(i64::MAX / 1000);
        let lease = chrono::Duration::seconds(lease_secs);
        let last_seen = record.heartbeat_at.or(record.started_at).unwrap_or(record.created_at);
        if Utc::now().signed_duration_since(last_seen) < lease {
            return Ok(false);
        }

        match self
            .checkpoint
            .transition_status(workflow_id, StatusEvent::Interrupt, StatusChange::default())
            .await
        {
            Ok(_) => {
                tracing::info!(
                    workflow_id,
                    previous_owner = record.owner.as_deref().unwrap_or("-"),
                    "recovered interrupted workflow"
                );
                Ok(true)
            }
            Err(WorkflowError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Interrupt every active run so it records RESUMABLE.
    ///
    /// Waits up to `shutdown_grace_secs` for runs to record their status
    /// themselves, then writes RESUMABLE for any that did not.
    pub async fn shutdown(&self) -> Result<(), WorkflowError> {
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for entry in self.active.iter() {
            let _ = entry.stop.set(StopReason::Interrupt);
            entry.token.cancel();
        }

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while !self.active.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            for workflow_id in &ids {
                if let Err(e) = self
                    .checkpoint
                    .transition_status(workflow_id, StatusEvent::Interrupt, StatusChange::default())
                    .await
                {
                    tracing::warn!(workflow_id = %workflow_id, error = %e, "could not mark workflow resumable");
                }
            }
        }
        tracing::info!(interrupted = ids.len(), drained, "workflow manager shut down");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Graph walker: drives a workflow graph to its sink output.
//!
//! Scheduling is readiness-driven. A task is spawned onto a `JoinSet` as
//! soon as every upstream task has an output, so independent branches never
//! wait on each other. Outputs already committed in the checkpoint store are
//! loaded up front; those tasks, and any ancestors only they needed, are
//! never executed again.

use std::collections::HashSet;
use std::sync::Arc;

use keelson_types::error::WorkflowError;
use keelson_types::status::WorkflowStatus;
use keelson_types::workflow::{WorkflowGraph, WorkflowInput};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::checkpoint::CheckpointManager;
use super::context::RunContext;
use super::dag::ExecutionPlan;
use super::executor::TaskExecutor;
use crate::repository::checkpoint::CheckpointStore;

type Joined = (String, Result<Value, WorkflowError>);

pub struct GraphWalker<S: CheckpointStore> {
    checkpoint: Arc<CheckpointManager<S>>,
    executor: Arc<TaskExecutor<S>>,
}

impl<S: CheckpointStore + 'static> GraphWalker<S> {
    pub fn new(checkpoint: Arc<CheckpointManager<S>>, executor: Arc<TaskExecutor<S>>) -> Self {
        Self {
            checkpoint,
            executor,
        }
    }

    /// Check a graph before it is persisted: structure, then registry keys.
    pub fn validate(&self, graph: &WorkflowGraph) -> Result<ExecutionPlan, WorkflowError> {
        let plan = ExecutionPlan::build(graph)?;
        for node in &graph.nodes {
            self.executor.check_registered(node)?;
        }
        Ok(plan)
    }

    /// Run `graph` for `workflow_id` until the sink has an output.
    ///
    /// - On a task failure, no new tasks start; tasks already running finish
    ///   (so their commits land) and the first failure is returned.
    /// - When `token` fires, or the stored status leaves RUNNING, the walk
    ///   returns at once with `Cancelled` or `Interrupted` and in-flight
    ///   tasks are dropped.
    pub async fn walk(
        &self,
        workflow_id: &str,
        graph: &WorkflowGraph,
        input: WorkflowInput,
        token: &CancellationToken,
    ) -> Result<Value, WorkflowError> {
        let plan = self.validate(graph)?;
        let committed = self.checkpoint.committed_outputs(workflow_id).await?;
        let mut ctx = RunContext::new(workflow_id, input).with_outputs(committed);

        let mut remaining: HashSet<String> =
            plan.pending_nodes(&graph.sink, |name| ctx.has_output(name));
        tracing::debug!(
            workflow_id,
            pending = remaining.len(),
            total = graph.nodes.len(),
            "walking workflow graph"
        );

        let mut join_set: JoinSet<Joined> = JoinSet::new();
        let mut failure: Option<WorkflowError> = None;

        loop {
            if failure.is_none() && !remaining.is_empty() {
                self.ensure_running(workflow_id).await?;

                let ready: Vec<String> = plan
                    .order
                    .iter()
                    .filter(|name| remaining.contains(*name))
                    .filter(|name| plan.dependencies(name).iter().all(|d| ctx.has_output(d)))
                    .cloned()
                    .collect();

                for name in ready {
                    remaining.remove(&name);
                    let Some(node) = graph.node(&name) else {
                        continue;
                    };
                    let args = ctx.resolve_args(node)?;
                    let executor = self.executor.clone();
                    let node = node.clone();
                    let wid = workflow_id.to_string();
                    tracing::debug!(workflow_id, task = %name, "scheduling task");
                    join_set.spawn(async move {
                        let result = executor.execute(&wid, &node, args).await;
                        (node.name, result)
                    });
                }
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(workflow_id, in_flight = join_set.len(), "walk stopped");
                    return Err(WorkflowError::Cancelled(workflow_id.to_string()));
                }
                joined = join_set.join_next() => joined,
            };

            match joined {
                Some(Ok((name, Ok(value)))) => ctx.set_output(name, value),
                Some(Ok((name, Err(err)))) => {
                    tracing::debug!(workflow_id, task = %name, error = %err, "task did not commit");
                    failure.get_or_insert(err);
                }
                Some(Err(join_err)) => {
                    failure.get_or_insert(WorkflowError::Checkpoint(format!(
                        "task join failed: {join_err}"
                    )));
                }
                None => break,
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        ctx.output(&graph.sink).cloned().ok_or_else(|| {
            WorkflowError::InvalidWorkflow(format!(
                "sink '{}' produced no output",
                graph.sink
            ))
        })
    }

    /// Stop scheduling once another writer moved the workflow out of RUNNING.
    async fn ensure_running(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        match self.checkpoint.load_status(workflow_id).await? {
            WorkflowStatus::Running => Ok(()),
            WorkflowStatus::Canceled => Err(WorkflowError::Cancelled(workflow_id.to_string())),
            _ => Err(WorkflowError::Interrupted(workflow_id.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

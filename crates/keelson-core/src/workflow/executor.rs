//! Task executor: one task node to one committed output.
//!
//! # Execution flow
//!
//! 1. Return the checkpointed output if the task already committed.
//! 2. Claim the `(workflow_id, task_name)` slot so no other executor in this
//!    process runs the same task concurrently.
//! 3. Run the task: function nodes go to the task runtime (or run in place)
//!    with retry and backoff; event nodes go through the event bridge.
//! 4. On success, persist the output (when `checkpoint` is set) before
//!    handing it back. On a caught error, persist the `{result, error}` pair.
//!    On exhausted retries, record a FAILED checkpoint and return
//!    `TaskExecution`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use keelson_types::config::EngineConfig;
use keelson_types::error::WorkflowError;
use keelson_types::event::RunEvent;
use keelson_types::workflow::{TaskKind, TaskNode, TaskStats};
use serde_json::{Value, json};

use super::checkpoint::{CheckpointManager, TaskOutput};
use super::retry::RetryPolicy;
use crate::event::bridge::EventBridge;
use crate::event::bus::EventBus;
use crate::event::listener::ListenerRegistry;
use crate::repository::checkpoint::CheckpointStore;
use crate::runtime::{TaskCall, TaskFailure, TaskRegistry, TaskRuntime, panic_message};

type SlotKey = (String, String);

/// Releases an in-flight slot when dropped, including on cancellation.
struct InFlightGuard<'a> {
    slots: &'a DashMap<SlotKey, ()>,
    key: SlotKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
    }
}

/// Raw outcome of running a task, before exception catching is applied.
struct Attempted {
    result: Result<Value, String>,
    retry_count: u32,
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

pub struct TaskExecutor<S: CheckpointStore> {
    checkpoint: Arc<CheckpointManager<S>>,
    registry: TaskRegistry,
    runtime: Arc<dyn TaskRuntime>,
    bridge: EventBridge<S>,
    retry: RetryPolicy,
    default_max_retries: u32,
    in_flight: DashMap<SlotKey, ()>,
    event_bus: EventBus,
}

impl<S: CheckpointStore> TaskExecutor<S> {
    pub fn new(
        checkpoint: Arc<CheckpointManager<S>>,
        registry: TaskRegistry,
        listeners: ListenerRegistry,
        runtime: Arc<dyn TaskRuntime>,
        config: &EngineConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            bridge: EventBridge::new(checkpoint.clone(), listeners),
            checkpoint,
            registry,
            runtime,
            retry: RetryPolicy::from_settings(&config.retry),
            default_max_retries: config.default_max_retries,
            in_flight: DashMap::new(),
            event_bus,
        }
    }

    /// Fail fast if the graph names a function or listener nobody registered.
    pub fn check_registered(&self, node: &TaskNode) -> Result<(), WorkflowError> {
        match &node.kind {
            TaskKind::Function(key) if !self.registry.contains(key) => {
                Err(WorkflowError::UnknownFunction(key.clone()))
            }
            TaskKind::Event(key) if !self.bridge.has_listener(key) => {
                Err(WorkflowError::UnknownListener(key.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Produce the committed output of `node` given its resolved arguments.
    pub async fn execute(
        &self,
        workflow_id: &str,
        node: &TaskNode,
        args: Vec<Value>,
    ) -> Result<Value, WorkflowError> {
        if let TaskOutput::Committed(value) =
            self.checkpoint.load_task_output(workflow_id, &node.name).await?
        {
            tracing::debug!(workflow_id, task = %node.name, "task already committed, skipping");
            return Ok(value);
        }

        let _guard = self.claim(workflow_id, &node.name)?;
        let start_time = Utc::now();

        let attempted = match &node.kind {
            TaskKind::Function(key) => self.run_function(workflow_id, node, key, &args).await?,
            TaskKind::Event(key) => self.run_event(workflow_id, node, key, &args).await?,
        };

        let stats = TaskStats {
            start_time,
            end_time: Utc::now(),
            retry_count: attempted.retry_count,
        };
        let catch = node.options.catch_exceptions;

        let value = match attempted.result {
            Ok(value) if catch => json!({ "result": value, "error": null }),
            Ok(value) => value,
            Err(error) if catch => json!({ "result": null, "error": error }),
            Err(error) => {
                self.checkpoint
                    .save_task_output(workflow_id, &node.name, Err(error.as_str()), &args, stats)
                    .await?;
                tracing::warn!(
                    workflow_id,
                    task = %node.name,
                    retry_count = attempted.retry_count,
                    %error,
                    "task failed"
                );
                return Err(WorkflowError::TaskExecution {
                    task_name: node.name.clone(),
                    attempts: attempted.retry_count + 1,
                    error,
                });
            }
        };

        let value = if node.options.checkpoint {
            let written = self
                .checkpoint
                .save_task_output(workflow_id, &node.name, Ok(&value), &args, stats)
                .await?;
            if written {
                value
            } else {
                // Another writer committed first; its output is the one dependents see.
                match self.checkpoint.load_task_output(workflow_id, &node.name).await? {
                    TaskOutput::Committed(stored) => stored,
                    _ => value,
                }
            }
        } else {
            value
        };

        self.event_bus.publish(RunEvent::TaskCommitted {
            workflow_id: workflow_id.to_string(),
            task_name: node.name.clone(),
            retry_count: attempted.retry_count,
            checkpointed: node.options.checkpoint,
        });
        Ok(value)
    }

    fn claim(&self, workflow_id: &str, task_name: &str) -> Result<InFlightGuard<'_>, WorkflowError> {
        let key = (workflow_id.to_string(), task_name.to_string());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::TaskInFlight {
                    workflow_id: workflow_id.to_string(),
                    task_name: task_name.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        Ok(InFlightGuard {
            slots: &self.in_flight,
            key,
        })
    }

    async fn run_function(
        &self,
        workflow_id: &str,
        node: &TaskNode,
        key: &str,
        args: &[Value],
    ) -> Result<Attempted, WorkflowError> {
        let function = self
            .registry
            .get(key)
            .ok_or_else(|| WorkflowError::UnknownFunction(key.to_string()))?;

        // A caught exception is data, so there is nothing to retry.
        let max_retries = if node.options.catch_exceptions {
            0
        } else {
            node.options.max_retries.unwrap_or(self.default_max_retries)
        };

        let mut attempt = 0u32;
        loop {
            let call = TaskCall {
                workflow_id: workflow_id.to_string(),
                task_name: node.name.clone(),
                args: args.to_vec(),
                attempt,
            };
            let result = if node.options.allow_inplace {
                AssertUnwindSafe(function(call))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(TaskFailure::new(format!(
                            "task panicked: {}",
                            panic_message(payload)
                        )))
                    })
            } else {
                self.runtime.dispatch(function.clone(), call).await
            };

            let failure = match result {
                Ok(value) => {
                    return Ok(Attempted {
                        result: Ok(value),
                        retry_count: attempt,
                    });
                }
                Err(failure) => failure,
            };

            let will_retry = self.retry.should_retry(attempt, max_retries);
            self.event_bus.publish(RunEvent::TaskFailed {
                workflow_id: workflow_id.to_string(),
                task_name: node.name.clone(),
                error: failure.message.clone(),
                will_retry,
            });
            if !will_retry {
                return Ok(Attempted {
                    result: Err(failure.message),
                    retry_count: attempt,
                });
            }

            attempt += 1;
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                workflow_id,
                task = %node.name,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "task attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_event(
        &self,
        workflow_id: &str,
        node: &TaskNode,
        key: &str,
        args: &[Value],
    ) -> Result<Attempted, WorkflowError> {
        let poll = self
            .bridge
            .resolve(workflow_id, &node.name, key, args.to_vec());
        let resolved = AssertUnwindSafe(poll)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(WorkflowError::TaskExecution {
                    task_name: node.name.clone(),
                    attempts: 1,
                    error: format!("listener panicked: {}", panic_message(payload)),
                })
            });
        let result = match resolved {
            Ok(value) => Ok(value),
            Err(WorkflowError::TaskExecution { error, .. }) => {
                self.event_bus.publish(RunEvent::TaskFailed {
                    workflow_id: workflow_id.to_string(),
                    task_name: node.name.clone(),
                    error: error.clone(),
                    will_retry: false,
                });
                Err(error)
            }
            Err(other) => return Err(other),
        };
        Ok(Attempted {
            result,
            retry_count: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::event::listener::EventListener;
    use crate::repository::memory::InMemoryCheckpointStore;
    use crate::runtime::LocalRuntime;
    use keelson_types::config::{BackoffKind, RetrySettings};
    use keelson_types::status::TaskStatus;
    use keelson_types::workflow::TaskOptions;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    struct Harness {
        executor: Arc<TaskExecutor<InMemoryCheckpointStore>>,
        checkpoint: Arc<CheckpointManager<InMemoryCheckpointStore>>,
        calls: Arc<AtomicU32>,
    }

    /// `flaky` fails its first `failures` calls, then returns "ok".
    /// `gate` blocks until the shared `Notify` fires.
    fn harness(failures: u32, gate: Arc<Notify>) -> Harness {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::with_builtins();
        {
            let calls = calls.clone();
            registry.register("flaky", move |_call: TaskCall| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= failures {
                        Err(TaskFailure::new(format!("transient failure {n}")))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            });
        }
        registry.register("gated", move |_call: TaskCall| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(json!("opened"))
            }
        });

        let config = EngineConfig {
            default_max_retries: 1,
            retry: RetrySettings {
                backoff: BackoffKind::Fixed,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..EngineConfig::default()
        };
        let checkpoint = Arc::new(CheckpointManager::new(
            InMemoryCheckpointStore::new(),
            Arc::new(JsonCodec),
        ));
        let executor = TaskExecutor::new(
            checkpoint.clone(),
            registry,
            ListenerRegistry::with_builtins(),
            Arc::new(LocalRuntime::default()),
            &config,
            EventBus::default(),
        );
        Harness {
            executor: Arc::new(executor),
            checkpoint,
            calls,
        }
    }

    fn flaky(options: TaskOptions) -> TaskNode {
        TaskNode::function("t", "flaky").with_options(options)
    }

    #[tokio::test]
    async fn test_retries_then_commits_with_retry_count() {
        let h = harness(2, Arc::new(Notify::new()));
        let node = flaky(TaskOptions::default().with_max_retries(2));

        let out = h.executor.execute("wf", &node, vec![]).await.unwrap();
        assert_eq!(out, json!("ok"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);

        let record = h.checkpoint.load_task_record("wf", "t").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Successful);
        assert_eq!(record.stats.retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_failure() {
        let h = harness(10, Arc::new(Notify::new()));
        let node = flaky(TaskOptions::default().with_max_retries(2));

        let err = h.executor.execute("wf", &node, vec![]).await.unwrap_err();
        match err {
            WorkflowError::TaskExecution { attempts, error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(error, "transient failure 3");
            }
            other => panic!("expected TaskExecution, got {other:?}"),
        }
        assert_eq!(
            h.checkpoint.load_task_output("wf", "t").await.unwrap(),
            TaskOutput::Failed("transient failure 3".to_string())
        );
    }

    #[tokio::test]
    async fn test_default_retries_come_from_config() {
        let h = harness(1, Arc::new(Notify::new()));
        let out = h
            .executor
            .execute("wf", &flaky(TaskOptions::default()), vec![])
            .await
            .unwrap();
        assert_eq!(out, json!("ok"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_committed_output_skips_execution() {
        let h = harness(0, Arc::new(Notify::new()));
        let node = flaky(TaskOptions::default());
        h.executor.execute("wf", &node, vec![]).await.unwrap();
        h.executor.execute("wf", &node, vec![]).await.unwrap();
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_catch_exceptions_returns_error_as_data() {
        let h = harness(10, Arc::new(Notify::new()));
        let node = flaky(
            TaskOptions::default()
                .with_catch_exceptions(true)
                .with_max_retries(5),
        );

        let out = h.executor.execute("wf", &node, vec![]).await.unwrap();
        assert_eq!(out, json!({"result": null, "error": "transient failure 1"}));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.checkpoint.load_task_output("wf", "t").await.unwrap(),
            TaskOutput::Committed(out)
        );
    }

    #[tokio::test]
    async fn test_catch_exceptions_wraps_success() {
        let h = harness(0, Arc::new(Notify::new()));
        let node = flaky(TaskOptions::default().with_catch_exceptions(true));
        let out = h.executor.execute("wf", &node, vec![]).await.unwrap();
        assert_eq!(out, json!({"result": "ok", "error": null}));
    }

    #[tokio::test]
    async fn test_unchecked_output_is_not_persisted() {
        let h = harness(0, Arc::new(Notify::new()));
        let node = TaskNode::function("s", "sum")
            .arg(json!(1))
            .arg(json!(2))
            .with_options(TaskOptions::default().with_checkpoint(false).with_allow_inplace(true));

        let out = h.executor.execute("wf", &node, vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(out, json!(3));
        assert_eq!(
            h.checkpoint.load_task_output("wf", "s").await.unwrap(),
            TaskOutput::NotPersisted
        );
    }

    #[tokio::test]
    async fn test_second_concurrent_execution_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness(0, gate.clone());
        let node = TaskNode::function("g", "gated");

        let first = {
            let executor = h.executor.clone();
            let node = node.clone();
            tokio::spawn(async move { executor.execute("wf", &node, vec![]).await })
        };
        // Let the first execution claim its slot and block on the gate.
        for _ in 0..100 {
            if !h.executor.in_flight.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let err = h.executor.execute("wf", &node, vec![]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::TaskInFlight { .. }));

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), json!("opened"));
        assert!(h.executor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let h = harness(0, Arc::new(Notify::new()));
        let node = TaskNode::function("x", "missing");
        assert!(matches!(
            h.executor.check_registered(&node),
            Err(WorkflowError::UnknownFunction(_))
        ));
        let err = h.executor.execute("wf", &node, vec![]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownFunction(name) if name == "missing"));
    }

    struct PanickingListener;

    impl EventListener for PanickingListener {
        fn poll_for_event(
            &self,
            _args: Vec<Value>,
        ) -> futures_util::future::BoxFuture<'static, Result<Value, TaskFailure>> {
            async move {
                if true {
                    panic!("listener exploded");
                }
                Ok(Value::Null)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_fails_as_task() {
        let h = harness(0, Arc::new(Notify::new()));
        let mut listeners = ListenerRegistry::with_builtins();
        listeners.register("explodes", PanickingListener);
        let executor = TaskExecutor::new(
            h.checkpoint.clone(),
            TaskRegistry::with_builtins(),
            listeners,
            Arc::new(LocalRuntime::default()),
            &EngineConfig::default(),
            EventBus::default(),
        );

        let node = TaskNode::event("hook", "explodes");
        let err = executor.execute("wf", &node, vec![]).await.unwrap_err();
        match err {
            WorkflowError::TaskExecution { task_name, error, .. } => {
                assert_eq!(task_name, "hook");
                assert!(error.contains("listener exploded"), "{error}");
            }
            other => panic!("expected TaskExecution, got {other:?}"),
        }
        assert!(matches!(
            h.checkpoint.load_task_output("wf", "hook").await.unwrap(),
            TaskOutput::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_timer_event_node_commits_end_time() {
        let h = harness(0, Arc::new(Notify::new()));
        let node = TaskNode::event("tick", "timer").arg(json!({"end_time": 5.0}));
        let out = h
            .executor
            .execute("wf", &node, vec![json!({"end_time": 5.0})])
            .await
            .unwrap();
        assert_eq!(out, json!(5.0));
        assert_eq!(
            h.checkpoint.load_task_output("wf", "tick").await.unwrap(),
            TaskOutput::Committed(json!(5.0))
        );
    }
}

//! Task functions and the runtimes that execute them.
//!
//! A task function is an async closure over its resolved argument list,
//! registered by key in a [`TaskRegistry`] so a stored graph can be rebuilt
//! into something executable. A [`TaskRuntime`] decides where a call runs;
//! [`LocalRuntime`] spawns it onto the tokio runtime.

pub mod builtin;
pub mod registry;

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Semaphore;

pub use registry::TaskRegistry;

/// One invocation of a task function.
#[derive(Debug, Clone)]
pub struct TaskCall {
    pub workflow_id: String,
    pub task_name: String,
    /// Resolved positional arguments.
    pub args: Vec<Value>,
    /// Zero-based attempt number.
    pub attempt: u32,
}

/// An error raised by task code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result future of a dispatched or in-place task call.
pub type TaskHandle = BoxFuture<'static, Result<Value, TaskFailure>>;

/// A registered task function.
pub type TaskFn = Arc<dyn Fn(TaskCall) -> TaskHandle + Send + Sync>;

/// Where task calls execute.
///
/// The returned handle resolves once the call finishes. A runtime must turn
/// any crash of the task itself into a `TaskFailure` rather than dropping it.
pub trait TaskRuntime: Send + Sync {
    fn dispatch(&self, function: TaskFn, call: TaskCall) -> TaskHandle;
}

/// Runs task calls as tokio tasks, optionally bounded by a semaphore.
#[derive(Debug, Clone, Default)]
pub struct LocalRuntime {
    limiter: Option<Arc<Semaphore>>,
}

impl LocalRuntime {
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            limiter: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }
}

impl TaskRuntime for LocalRuntime {
    fn dispatch(&self, function: TaskFn, call: TaskCall) -> TaskHandle {
        let limiter = self.limiter.clone();
        let task_name = call.task_name.clone();
        async move {
            let _permit = match limiter {
                Some(sem) => Some(
                    sem.acquire_owned()
                        .await
                        .map_err(|_| TaskFailure::new("task runtime is shut down"))?,
                ),
                None => None,
            };

            match tokio::spawn(function(call)).await {
                Ok(result) => result,
                Err(join_err) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic());
                    tracing::warn!(task = %task_name, %message, "task panicked");
                    Err(TaskFailure::new(format!("task panicked: {message}")))
                }
                Err(_) => Err(TaskFailure::new("task was cancelled")),
            }
        }
        .boxed()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn call(args: Vec<Value>) -> TaskCall {
        TaskCall {
            workflow_id: "wf".to_string(),
            task_name: "t".to_string(),
            args,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_local_runtime_returns_function_result() {
        let f: TaskFn = Arc::new(|call: TaskCall| async move { Ok(call.args[0].clone()) }.boxed());
        let out = LocalRuntime::default()
            .dispatch(f, call(vec![json!(7)]))
            .await
            .unwrap();
        assert_eq!(out, json!(7));
    }

    #[tokio::test]
    async fn test_local_runtime_maps_panic_to_failure() {
        let f: TaskFn = Arc::new(|_call: TaskCall| {
            async move {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            }
            .boxed()
        });
        let err = LocalRuntime::default()
            .dispatch(f, call(vec![]))
            .await
            .unwrap_err();
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_local_runtime_respects_concurrency_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let f: TaskFn = {
            let running = running.clone();
            let peak = peak.clone();
            Arc::new(move |_call: TaskCall| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
                .boxed()
            })
        };

        let runtime = LocalRuntime::new(Some(2));
        let handles: Vec<_> = (0..6)
            .map(|_| runtime.dispatch(f.clone(), call(vec![])))
            .collect();
        for result in futures_util::future::join_all(handles).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}

//! Event listeners: adapters from an external event source to a task output.
//!
//! A listener is polled until its event arrives. Once the engine has durably
//! recorded the event it calls `event_checkpointed`, which is where a source
//! with delivery semantics (a queue, a webhook inbox) acknowledges it. That
//! call can repeat after a restart, so it must be idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use keelson_types::workflow::TaskNode;
use serde_json::{Value, json};

use crate::runtime::TaskFailure;

/// Registry key of the built-in timer listener.
pub const TIMER_LISTENER: &str = "timer";

pub trait EventListener: Send + Sync {
    /// Resolve once the event is available.
    fn poll_for_event(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value, TaskFailure>>;

    /// Called after the event is durably committed.
    fn event_checkpointed(&self, _event: &Value) -> BoxFuture<'static, Result<(), TaskFailure>> {
        async { Ok(()) }.boxed()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: HashMap<String, Arc<dyn EventListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the timer listener registered as `"timer"`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TIMER_LISTENER, TimerListener);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        listener: impl EventListener + 'static,
    ) -> &mut Self {
        self.listeners.insert(name.into(), Arc::new(listener));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EventListener>> {
        self.listeners.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.listeners.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Resolves at a fixed wall-clock deadline.
///
/// Takes `{"end_time": <unix seconds>}` (or a bare number) and resolves to
/// the end time once it has passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerListener;

fn parse_end_time(args: &[Value]) -> Result<f64, TaskFailure> {
    let end_time = match args.first() {
        Some(Value::Object(map)) => map.get("end_time").and_then(Value::as_f64),
        Some(other) => other.as_f64(),
        None => None,
    };
    end_time
        .filter(|t| t.is_finite())
        .ok_or_else(|| TaskFailure::new("timer expects {\"end_time\": <unix seconds>}"))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

impl EventListener for TimerListener {
    fn poll_for_event(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value, TaskFailure>> {
        async move {
            let end_time = parse_end_time(&args)?;
            let remaining = end_time - unix_now();
            if remaining > 0.0 {
                // Deadlines past Duration's range never fire.
                let wait = Duration::try_from_secs_f64(remaining).unwrap_or(Duration::MAX);
                tokio::time::sleep(wait).await;
            }
            Ok(json!(end_time))
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Node constructors
// ---------------------------------------------------------------------------

/// A timer node that resolves `duration` after this call.
///
/// The deadline is computed now and stored in the graph, so a resumed run
/// waits only for whatever is left of it.
pub fn sleep(name: impl Into<String>, duration: Duration) -> TaskNode {
    let end_time = unix_now() + duration.as_secs_f64();
    TaskNode::event(name, TIMER_LISTENER).arg(json!({ "end_time": end_time }))
}

/// A node that waits on the listener registered as `listener`.
pub fn wait_for_event(
    name: impl Into<String>,
    listener: impl Into<String>,
    args: Vec<Value>,
) -> TaskNode {
    args.into_iter()
        .fold(TaskNode::event(name, listener), TaskNode::arg)
}

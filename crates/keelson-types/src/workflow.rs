//! Workflow graph, task options and persisted record types.
//!
//! A `WorkflowGraph` is the already-built DAG the engine consumes. It is plain
//! serde data so it can be stored next to the workflow record and rebuilt on
//! resume: task functions and event listeners are referenced by registry key,
//! never by pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;
use crate::status::{EventState, TaskStatus, WorkflowStatus};

// ---------------------------------------------------------------------------
// Task options
// ---------------------------------------------------------------------------

/// Option keys accepted by [`TaskOptions::from_map`].
pub const VALID_OPTION_KEYS: [&str; 6] = [
    "name",
    "metadata",
    "catch_exceptions",
    "max_retries",
    "allow_inplace",
    "checkpoint",
];

fn default_checkpoint() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-task execution options, fixed when the task is attached to a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Overrides the task's name within the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Task-level user metadata (must be a JSON object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Turn a thrown error into a `{result, error}` output instead of failing.
    #[serde(default, skip_serializing_if = "is_false")]
    pub catch_exceptions: bool,
    /// Retries after the first attempt. `None` uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Run in the coordinating task instead of dispatching to the runtime.
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_inplace: bool,
    /// Persist the output before dependents may consume it.
    #[serde(default = "default_checkpoint", skip_serializing_if = "is_true")]
    pub checkpoint: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: None,
            metadata: None,
            catch_exceptions: false,
            max_retries: None,
            allow_inplace: false,
            checkpoint: default_checkpoint(),
        }
    }
}

impl TaskOptions {
    /// Build options from a loosely-typed key/value map.
    ///
    /// Unknown keys and mistyped values are rejected with
    /// [`WorkflowError::InvalidOptions`].
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, WorkflowError> {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "name" => {
                    let name = value.as_str().ok_or_else(|| mistyped(key, "a string"))?;
                    options.name = Some(name.to_string());
                }
                "metadata" => options.metadata = Some(validate_user_metadata(value)?),
                "catch_exceptions" => {
                    options.catch_exceptions =
                        value.as_bool().ok_or_else(|| mistyped(key, "a boolean"))?;
                }
                "max_retries" => {
                    let retries = value
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| mistyped(key, "a non-negative integer"))?;
                    options.max_retries = Some(retries);
                }
                "allow_inplace" => {
                    options.allow_inplace =
                        value.as_bool().ok_or_else(|| mistyped(key, "a boolean"))?;
                }
                "checkpoint" => {
                    options.checkpoint =
                        value.as_bool().ok_or_else(|| mistyped(key, "a boolean"))?;
                }
                other => {
                    return Err(WorkflowError::InvalidOptions(format!(
                        "unknown option '{other}' (valid options: {})",
                        VALID_OPTION_KEYS.join(", ")
                    )));
                }
            }
        }
        Ok(options)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_catch_exceptions(mut self, catch: bool) -> Self {
        self.catch_exceptions = catch;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_allow_inplace(mut self, inplace: bool) -> Self {
        self.allow_inplace = inplace;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

fn mistyped(key: &str, expected: &str) -> WorkflowError {
    WorkflowError::InvalidOptions(format!("option '{key}' must be {expected}"))
}

/// User metadata must be a JSON object.
pub fn validate_user_metadata(value: &Value) -> Result<Map<String, Value>, WorkflowError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        other => Err(WorkflowError::InvalidOptions(format!(
            "metadata must be a JSON object, got {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// What a task node does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Invoke the task function registered under this key.
    Function(String),
    /// Wait on the event listener registered under this key.
    Event(String),
}

impl TaskKind {
    /// `"FUNCTION"` or `"EVENT"`, as reported in task metadata.
    pub fn task_type(&self) -> &'static str {
        match self {
            TaskKind::Function(_) => "FUNCTION",
            TaskKind::Event(_) => "EVENT",
        }
    }

    fn key(&self) -> &str {
        match self {
            TaskKind::Function(key) | TaskKind::Event(key) => key,
        }
    }
}

/// One positional argument of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskArg {
    /// A constant baked into the graph.
    Literal(Value),
    /// The output of another task in the same graph.
    Upstream(String),
    /// A positional workflow input.
    Input(usize),
    /// A keyword workflow input.
    InputKey(String),
}

/// A unit of work within a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique within the workflow. Empty names are filled in by [`WorkflowGraph::new`].
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TaskArg>,
    #[serde(default)]
    pub options: TaskOptions,
}

impl TaskNode {
    /// A node that calls the registered task function `function`.
    pub fn function(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Function(function.into()),
            args: Vec::new(),
            options: TaskOptions::default(),
        }
    }

    /// A node that waits on the registered event listener `listener`.
    pub fn event(name: impl Into<String>, listener: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Event(listener.into()),
            args: Vec::new(),
            options: TaskOptions::default(),
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(TaskArg::Literal(value));
        self
    }

    pub fn upstream(mut self, task_name: impl Into<String>) -> Self {
        self.args.push(TaskArg::Upstream(task_name.into()));
        self
    }

    pub fn input(mut self, index: usize) -> Self {
        self.args.push(TaskArg::Input(index));
        self
    }

    pub fn input_key(mut self, key: impl Into<String>) -> Self {
        self.args.push(TaskArg::InputKey(key.into()));
        self
    }

    /// Attach options. A name in the options renames the node.
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        if let Some(name) = &options.name {
            self.name = name.clone();
        }
        self.options = options;
        self
    }

    /// Names of the tasks this node consumes, in argument order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            TaskArg::Upstream(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// A DAG of task nodes with one designated sink whose output is the
/// workflow's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<TaskNode>,
    pub sink: String,
}

impl WorkflowGraph {
    /// Build a graph, generating `"{key}_{index}"` names for unnamed nodes.
    pub fn new(nodes: Vec<TaskNode>, sink: impl Into<String>) -> Self {
        let nodes = nodes
            .into_iter()
            .enumerate()
            .map(|(idx, mut node)| {
                if node.name.is_empty() {
                    node.name = format!("{}_{idx}", node.kind.key());
                }
                node
            })
            .collect();
        Self {
            nodes,
            sink: sink.into(),
        }
    }

    /// Build a graph whose sink is the last node.
    pub fn from_nodes(nodes: Vec<TaskNode>) -> Self {
        let graph = Self::new(nodes, String::new());
        let sink = graph
            .nodes
            .last()
            .map(|n| n.name.clone())
            .unwrap_or_default();
        Self { sink, ..graph }
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Positional and keyword inputs supplied with a run request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl WorkflowInput {
    pub fn args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// The single metadata record of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Graph the run executes; rebuilt from here on resume.
    pub graph: WorkflowGraph,
    pub input: WorkflowInput,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
    /// Manager instance driving the run while RUNNING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Last liveness stamp written by `owner`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Codec bytes of the sink output once SUCCESSFUL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Timing and retry statistics of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Retries performed after the first attempt.
    pub retry_count: u32,
}

/// Durable record of a task's result, keyed by `(workflow_id, task_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub workflow_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    /// Codec bytes of the resolved argument list.
    pub input: Vec<u8>,
    /// Codec bytes of the output; `None` for failed records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: TaskStats,
}

/// Durable record of an external event bound into a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub workflow_id: String,
    pub task_name: String,
    pub listener: String,
    pub state: EventState,
    /// Codec bytes of the event once COMMITTED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Metadata query results
// ---------------------------------------------------------------------------

/// Workflow-level run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub user_metadata: Map<String, Value>,
    pub stats: WorkflowStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub workflow_id: String,
    pub task_name: String,
    pub task_type: String,
    /// Absent until the task has a checkpoint record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub user_metadata: Map<String, Value>,
    pub options: TaskOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TaskStats>,
}

/// Result of `get_metadata`: workflow-level, or task-level when a task name
/// was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    Task(TaskMetadata),
    Workflow(WorkflowMetadata),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_task_options_defaults() {
        let options = TaskOptions::default();
        assert!(options.checkpoint);
        assert!(!options.catch_exceptions);
        assert!(!options.allow_inplace);
        assert!(options.max_retries.is_none());
    }

    #[test]
    fn test_task_options_from_map() {
        let options = TaskOptions::from_map(&options_map(json!({
            "name": "fetch",
            "metadata": {"owner": "etl"},
            "catch_exceptions": true,
            "max_retries": 2,
            "allow_inplace": true,
            "checkpoint": false,
        })))
        .unwrap();

        assert_eq!(options.name.as_deref(), Some("fetch"));
        assert_eq!(options.metadata.unwrap()["owner"], "etl");
        assert!(options.catch_exceptions);
        assert_eq!(options.max_retries, Some(2));
        assert!(options.allow_inplace);
        assert!(!options.checkpoint);
    }

    #[test]
    fn test_task_options_rejects_unknown_key() {
        let err = TaskOptions::from_map(&options_map(json!({"retries": 3}))).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidOptions(_)));
        assert!(err.to_string().contains("retries"));
    }

    #[test]
    fn test_task_options_rejects_mistyped_values() {
        for bad in [
            json!({"max_retries": -1}),
            json!({"catch_exceptions": "yes"}),
            json!({"metadata": [1, 2]}),
            json!({"name": 7}),
        ] {
            let err = TaskOptions::from_map(&options_map(bad.clone())).unwrap_err();
            assert!(
                matches!(err, WorkflowError::InvalidOptions(_)),
                "expected InvalidOptions for {bad}"
            );
        }
    }

    #[test]
    fn test_validate_user_metadata() {
        assert!(validate_user_metadata(&json!({"k": "v"})).is_ok());
        let err = validate_user_metadata(&json!("k=v")).unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn test_options_name_renames_node() {
        let node = TaskNode::function("", "sum").with_options(TaskOptions::default().with_name("total"));
        assert_eq!(node.name, "total");
    }

    #[test]
    fn test_graph_generates_names_for_unnamed_nodes() {
        let graph = WorkflowGraph::from_nodes(vec![
            TaskNode::function("", "identity").arg(json!(1)),
            TaskNode::function("", "sum").upstream("identity_0"),
        ]);
        assert_eq!(graph.nodes[0].name, "identity_0");
        assert_eq!(graph.nodes[1].name, "sum_1");
        assert_eq!(graph.sink, "sum_1");
    }

    #[test]
    fn test_task_node_dependencies() {
        let node = TaskNode::function("c", "sum")
            .upstream("a")
            .arg(json!(10))
            .upstream("b")
            .input(0);
        let deps: Vec<&str> = node.dependencies().collect();
        assert_eq!(deps, vec!["a", "b"]);
    }

    #[test]
    fn test_task_node_json_shape() {
        let node = TaskNode::function("c", "sum").upstream("a").upstream("b");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["function"], "sum");
        assert_eq!(value["args"][0]["upstream"], "a");
        // Default options stay out of the serialized form.
        assert_eq!(value["options"], json!({}));

        let back: TaskNode = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_metadata_untagged_serialization() {
        let meta = Metadata::Workflow(WorkflowMetadata {
            workflow_id: "wf".to_string(),
            status: WorkflowStatus::Successful,
            user_metadata: Map::new(),
            stats: WorkflowStats {
                start_time: None,
                end_time: None,
            },
            error: None,
        });
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["status"], "SUCCESSFUL");
        assert!(value.get("task_type").is_none());
    }
}

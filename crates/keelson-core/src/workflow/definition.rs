//! Workflow file parsing and graph validation.
//!
//! A workflow file is YAML describing the task nodes of a graph:
//!
//! ```yaml
//! sink: total            # optional, defaults to the last node
//! nodes:
//!   - name: a
//!     function: identity
//!     args: [{ input: 0 }]
//!   - name: total
//!     function: sum
//!     args: [{ upstream: a }, { literal: 10 }]
//!     options: { max_retries: 2 }
//! ```
//!
//! Options arrive as a loose map and go through `TaskOptions::from_map`, so
//! a misspelled option is rejected instead of silently ignored.

use std::path::Path;

use keelson_types::error::WorkflowError;
use keelson_types::workflow::{TaskArg, TaskKind, TaskNode, TaskOptions, WorkflowGraph};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::dag::ExecutionPlan;

#[derive(Debug, Deserialize)]
struct RawGraph {
    #[serde(default)]
    sink: Option<String>,
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    name: String,
    #[serde(flatten)]
    kind: TaskKind,
    #[serde(default)]
    args: Vec<TaskArg>,
    #[serde(default)]
    options: Map<String, Value>,
}

impl RawNode {
    fn into_node(self) -> Result<TaskNode, WorkflowError> {
        let options = TaskOptions::from_map(&self.options)?;
        let node = TaskNode {
            name: self.name,
            kind: self.kind,
            args: self.args,
            options: TaskOptions::default(),
        };
        Ok(node.with_options(options))
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML workflow into a validated `WorkflowGraph`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowGraph, WorkflowError> {
    let raw: RawGraph = serde_yaml_ng::from_str(yaml)
        .map_err(|e| WorkflowError::InvalidWorkflow(format!("parse error: {e}")))?;

    let nodes = raw
        .nodes
        .into_iter()
        .map(RawNode::into_node)
        .collect::<Result<Vec<_>, _>>()?;

    let graph = match raw.sink {
        Some(sink) => WorkflowGraph::new(nodes, sink),
        None => WorkflowGraph::from_nodes(nodes),
    };
    validate_graph(&graph)?;
    Ok(graph)
}

/// Read and parse a workflow file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowGraph, WorkflowError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        WorkflowError::InvalidWorkflow(format!("failed to read {}: {e}", path.display()))
    })?;
    parse_workflow_yaml(&yaml)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a graph and return its plan.
///
/// Checks:
/// - At least one task exists and every name is unique
/// - The sink is a task of the graph
/// - Every upstream reference points to an existing task
/// - The graph is acyclic
/// - Task metadata, when present, is an object (enforced by `TaskOptions`)
pub fn validate_graph(graph: &WorkflowGraph) -> Result<ExecutionPlan, WorkflowError> {
    ExecutionPlan::build(graph)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! DAG construction, cycle detection, and resume-aware node selection.
//!
//! Uses `petgraph` to model task dependencies as a directed graph with an
//! edge from each upstream task to its consumer. Topological sort detects
//! cycles when the plan is built, before anything runs.

use std::collections::{HashMap, HashSet};

use keelson_types::error::WorkflowError;
use keelson_types::workflow::WorkflowGraph;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// Validated dependency structure of a workflow graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Every node in a topological order.
    pub order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Build and validate a plan.
    ///
    /// Fails with `InvalidWorkflow` if the graph is empty, repeats a node
    /// name, names a missing sink, references an unknown upstream task or
    /// contains a cycle.
    pub fn build(graph: &WorkflowGraph) -> Result<Self, WorkflowError> {
        if graph.nodes.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(
                "workflow must have at least one task".to_string(),
            ));
        }

        let mut name_to_idx = HashMap::new();
        let mut dag = DiGraph::<&str, ()>::new();
        for node in &graph.nodes {
            if node.name.is_empty() {
                return Err(WorkflowError::InvalidWorkflow(
                    "task names must not be empty".to_string(),
                ));
            }
            let idx = dag.add_node(node.name.as_str());
            if name_to_idx.insert(node.name.as_str(), idx).is_some() {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate task name '{}'",
                    node.name
                )));
            }
        }

        if !name_to_idx.contains_key(graph.sink.as_str()) {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "sink '{}' is not a task of this workflow",
                graph.sink
            )));
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &graph.nodes {
            let to_idx = name_to_idx[node.name.as_str()];
            let deps = dependencies.entry(node.name.clone()).or_default();
            for dep in node.dependencies() {
                let from_idx = name_to_idx.get(dep).ok_or_else(|| {
                    WorkflowError::InvalidWorkflow(format!(
                        "task '{}' depends on unknown task '{}'",
                        node.name, dep
                    ))
                })?;
                // A task may consume the same upstream more than once.
                if deps.iter().any(|d| d == dep) {
                    continue;
                }
                deps.push(dep.to_string());
                dependents
                    .entry(dep.to_string())
                    .or_default()
                    .push(node.name.clone());
                dag.add_edge(*from_idx, to_idx, ());
            }
        }

        let sorted = toposort(&dag, None).map_err(|cycle| {
            let name = dag[cycle.node_id()];
            WorkflowError::InvalidWorkflow(format!("cycle detected involving task '{name}'"))
        })?;
        let order = sorted.into_iter().map(|idx| dag[idx].to_string()).collect();

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Direct upstream tasks of `name`, without repeats.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct consumers of `name`.
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks that must execute to produce `sink`'s output.
    ///
    /// Walks upstream from the sink and stops at tasks for which
    /// `is_committed` is true: their recorded output feeds dependents and
    /// their own ancestors are not needed. Tasks unrelated to the sink are
    /// never included.
    pub fn pending_nodes(&self, sink: &str, is_committed: impl Fn(&str) -> bool) -> HashSet<String> {
        let mut pending = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![sink];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if is_committed(current) {
                continue;
            }
            pending.insert(current.to_string());
            for dep in self.dependencies(current) {
                stack.push(dep.as_str());
            }
        }

        pending
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_types::workflow::TaskNode;

    /// Helper: a `collect` task consuming the given upstream tasks.
    fn task(name: &str, deps: Vec<&str>) -> TaskNode {
        deps.into_iter()
            .fold(TaskNode::function(name, "collect"), |node, dep| node.upstream(dep))
    }

    fn graph(nodes: Vec<TaskNode>) -> WorkflowGraph {
        WorkflowGraph::from_nodes(nodes)
    }

    fn position(plan: &ExecutionPlan, name: &str) -> usize {
        plan.order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        // A -> {B, C} -> D
        let plan = ExecutionPlan::build(&graph(vec![
            task("d", vec!["b", "c"]),
            task("b", vec!["a"]),
            task("c", vec!["a"]),
            task("a", vec![]),
        ]))
        .unwrap();
        assert!(position(&plan, "a") < position(&plan, "b"));
        assert!(position(&plan, "a") < position(&plan, "c"));
        assert!(position(&plan, "b") < position(&plan, "d"));
        assert!(position(&plan, "c") < position(&plan, "d"));
        assert_eq!(plan.dependents("a").len(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        let err = ExecutionPlan::build(&graph(vec![
            task("a", vec!["c"]),
            task("b", vec!["a"]),
            task("c", vec!["b"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidWorkflow(_)));
        assert!(err.to_string().contains("cycle detected"), "got: {err}");
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = ExecutionPlan::build(&graph(vec![task("a", vec!["a"])])).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = ExecutionPlan::build(&graph(vec![task("a", vec!["missing"])])).unwrap_err();
        assert!(err.to_string().contains("unknown task 'missing'"));
    }

    #[test]
    fn test_duplicate_names_and_missing_sink() {
        let err = ExecutionPlan::build(&graph(vec![task("a", vec![]), task("a", vec![])]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate task name"));

        let bad_sink = WorkflowGraph::new(vec![task("a", vec![])], "z");
        let err = ExecutionPlan::build(&bad_sink).unwrap_err();
        assert!(err.to_string().contains("sink 'z'"));
    }

    #[test]
    fn test_empty_graph_is_invalid() {
        let err = ExecutionPlan::build(&WorkflowGraph::new(vec![], "a")).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidWorkflow(_)));
    }

    #[test]
    fn test_repeated_upstream_is_deduplicated() {
        let plan = ExecutionPlan::build(&graph(vec![
            task("a", vec![]),
            task("b", vec!["a", "a"]),
        ]))
        .unwrap();
        assert_eq!(plan.dependencies("b"), ["a".to_string()]);
        assert_eq!(plan.dependents("a"), ["b".to_string()]);
    }

    // -----------------------------------------------------------------------
    // Pending nodes
    // -----------------------------------------------------------------------

    #[test]
    fn test_pending_nodes_excludes_tasks_outside_sink_ancestry() {
        // a -> c (sink), b is unrelated
        let g = WorkflowGraph::new(
            vec![task("a", vec![]), task("b", vec![]), task("c", vec!["a"])],
            "c",
        );
        let plan = ExecutionPlan::build(&g).unwrap();
        let pending = plan.pending_nodes("c", |_| false);
        assert_eq!(pending, HashSet::from(["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_pending_nodes_stops_at_committed_tasks() {
        // root -> mid -> leaf; mid is committed, so root is not needed
        let plan = ExecutionPlan::build(&graph(vec![
            task("root", vec![]),
            task("mid", vec!["root"]),
            task("leaf", vec!["mid"]),
        ]))
        .unwrap();
        let pending = plan.pending_nodes("leaf", |name| name == "mid");
        assert_eq!(pending, HashSet::from(["leaf".to_string()]));

        assert!(plan.pending_nodes("leaf", |_| true).is_empty());
    }
}

//! Per-run execution context: workflow inputs and the outputs produced so far.

use std::collections::HashMap;

use keelson_types::error::WorkflowError;
use keelson_types::workflow::{TaskArg, TaskNode, WorkflowInput};
use serde_json::Value;

/// State the walker threads through one run of a graph.
///
/// `outputs` starts with the committed outputs loaded from the checkpoint
/// store and grows as tasks finish, including tasks whose output is kept
/// in memory only.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workflow_id: String,
    pub input: WorkflowInput,
    outputs: HashMap<String, Value>,
}

impl RunContext {
    pub fn new(workflow_id: impl Into<String>, input: WorkflowInput) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            input,
            outputs: HashMap::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: HashMap<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn has_output(&self, task_name: &str) -> bool {
        self.outputs.contains_key(task_name)
    }

    pub fn output(&self, task_name: &str) -> Option<&Value> {
        self.outputs.get(task_name)
    }

    pub fn set_output(&mut self, task_name: impl Into<String>, value: Value) {
        self.outputs.insert(task_name.into(), value);
    }

    /// Turn a node's argument list into concrete values.
    pub fn resolve_args(&self, node: &TaskNode) -> Result<Vec<Value>, WorkflowError> {
        node.args
            .iter()
            .map(|arg| match arg {
                TaskArg::Literal(value) => Ok(value.clone()),
                TaskArg::Upstream(name) => self.outputs.get(name).cloned().ok_or_else(|| {
                    WorkflowError::InvalidWorkflow(format!(
                        "task '{}' needs the output of '{name}', which is not available",
                        node.name
                    ))
                }),
                TaskArg::Input(index) => self.input.args.get(*index).cloned().ok_or_else(|| {
                    WorkflowError::InvalidWorkflow(format!(
                        "task '{}' reads input #{index} but only {} were supplied",
                        node.name,
                        self.input.args.len()
                    ))
                }),
                TaskArg::InputKey(key) => self.input.kwargs.get(key).cloned().ok_or_else(|| {
                    WorkflowError::InvalidWorkflow(format!(
                        "task '{}' reads input '{key}', which was not supplied",
                        node.name
                    ))
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn input() -> WorkflowInput {
        let mut kwargs = Map::new();
        kwargs.insert("scale".to_string(), json!(10));
        WorkflowInput {
            args: vec![json!(1), json!(2)],
            kwargs,
        }
    }

    #[test]
    fn test_resolve_args_in_order() {
        let mut ctx = RunContext::new("wf", input());
        ctx.set_output("a", json!("from-a"));

        let node = TaskNode::function("c", "collect")
            .upstream("a")
            .input(1)
            .input_key("scale")
            .arg(json!(null));
        assert_eq!(
            ctx.resolve_args(&node).unwrap(),
            vec![json!("from-a"), json!(2), json!(10), Value::Null]
        );
    }

    #[test]
    fn test_missing_inputs_are_invalid() {
        let ctx = RunContext::new("wf", input());
        for node in [
            TaskNode::function("x", "identity").upstream("nope"),
            TaskNode::function("x", "identity").input(5),
            TaskNode::function("x", "identity").input_key("offset"),
        ] {
            let err = ctx.resolve_args(&node).unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidWorkflow(_)));
        }
    }
}

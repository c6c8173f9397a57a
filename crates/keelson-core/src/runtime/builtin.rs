//! Built-in task functions available to every engine and to workflow files.

use serde_json::{Number, Value};

use super::{TaskCall, TaskFailure, TaskRegistry};

pub(crate) fn register_all(registry: &mut TaskRegistry) {
    registry
        .register("identity", |call: TaskCall| async move { identity(call.args) })
        .register("sum", |call: TaskCall| async move { sum(&call.args) })
        .register("product", |call: TaskCall| async move { product(&call.args) })
        .register("concat", |call: TaskCall| async move { concat(&call.args) })
        .register("collect", |call: TaskCall| async move { Ok(Value::Array(call.args)) })
        .register("fail", |call: TaskCall| async move { Err(fail(&call.args)) });
}

/// The single argument, or `null` when there is none.
fn identity(mut args: Vec<Value>) -> Result<Value, TaskFailure> {
    match args.len() {
        0 => Ok(Value::Null),
        1 => Ok(args.remove(0)),
        n => Err(TaskFailure::new(format!(
            "identity takes at most one argument, got {n}"
        ))),
    }
}

fn numbers(args: &[Value], op: &str) -> Result<Vec<Number>, TaskFailure> {
    args.iter()
        .map(|v| match v {
            Value::Number(n) => Ok(n.clone()),
            other => Err(TaskFailure::new(format!(
                "{op} expects numbers, got {other}"
            ))),
        })
        .collect()
}

/// Integer arithmetic while every input is an integer, float otherwise.
fn fold_numbers(
    numbers: &[Number],
    init: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    let ints: Option<Vec<i64>> = numbers.iter().map(Number::as_i64).collect();
    if let Some(ints) = ints {
        let folded = ints
            .iter()
            .try_fold(init, |acc, n| int_op(acc, *n));
        if let Some(total) = folded {
            return Value::from(total);
        }
    }
    let total = numbers
        .iter()
        .filter_map(Number::as_f64)
        .fold(init as f64, float_op);
    Value::from(total)
}

fn sum(args: &[Value]) -> Result<Value, TaskFailure> {
    let nums = numbers(args, "sum")?;
    Ok(fold_numbers(&nums, 0, i64::checked_add, |a, b| a + b))
}

fn product(args: &[Value]) -> Result<Value, TaskFailure> {
    let nums = numbers(args, "product")?;
    Ok(fold_numbers(&nums, 1, i64::checked_mul, |a, b| a * b))
}

/// Joins strings; non-string arguments use their JSON text.
fn concat(args: &[Value]) -> Result<Value, TaskFailure> {
    let joined: String = args
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::String(joined))
}

fn fail(args: &[Value]) -> TaskFailure {
    match args.first() {
        Some(Value::String(message)) => TaskFailure::new(message.clone()),
        Some(other) => TaskFailure::new(other.to_string()),
        None => TaskFailure::new("task failed"),
    }
}

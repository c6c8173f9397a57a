//! CLI workflow commands.
//!
//! Provides run, resume, resume-all, list, status, metadata, output, cancel
//! and delete on top of the workflow manager.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::{StyledObject, style};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use keelson_core::workflow::definition::load_workflow_file;
use keelson_core::workflow::{RunRequest, WorkflowHandle};
use keelson_types::error::WorkflowError;
use keelson_types::event::RunEvent;
use keelson_types::status::{StatusFilter, WorkflowStatus};
use keelson_types::workflow::{Metadata, WorkflowInput};

use super::Commands;
use crate::state::AppState;

/// How results are rendered.
#[derive(Debug, Clone, Copy)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
}

impl OutputMode {
    fn decorated(self) -> bool {
        !self.json && !self.quiet
    }
}

/// Dispatch a workflow command. `Completions` is handled before state exists.
pub async fn handle_command(cmd: Commands, state: &AppState, mode: OutputMode) -> Result<()> {
    match cmd {
        Commands::Run {
            file,
            id,
            metadata,
            args,
            kwargs,
        } => {
            let request = build_run_request(
                &file,
                id,
                metadata.as_deref(),
                args.as_deref(),
                kwargs.as_deref(),
            )?;
            handle_run(request, state, mode).await
        }
        Commands::Resume { workflow_id } => handle_resume(&workflow_id, state, mode).await,
        Commands::ResumeAll { include_failed } => {
            handle_resume_all(include_failed, state, mode).await
        }
        Commands::List { statuses } => handle_list(statuses, state, mode).await,
        Commands::Status { workflow_id } => handle_status(&workflow_id, state, mode).await,
        Commands::Metadata { workflow_id, task } => {
            handle_metadata(&workflow_id, task.as_deref(), state, mode).await
        }
        Commands::Output { workflow_id, task } => {
            handle_output(&workflow_id, task.as_deref(), state, mode).await
        }
        Commands::Cancel { workflow_id } => handle_cancel(&workflow_id, state, mode).await,
        Commands::Delete { workflow_id } => handle_delete(&workflow_id, state, mode).await,
        Commands::Completions { .. } => bail!("completions do not need a workflow manager"),
    }
}

// ---------------------------------------------------------------------------
// Run / resume
// ---------------------------------------------------------------------------

/// Load the graph and parse the JSON arguments of `keelson run`.
pub fn build_run_request(
    file: &Path,
    id: Option<String>,
    metadata: Option<&str>,
    args: Option<&str>,
    kwargs: Option<&str>,
) -> Result<RunRequest> {
    let graph = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow {}", file.display()))?;

    let args = match args {
        Some(raw) => match parse_json(raw, "--args")? {
            Value::Array(items) => items,
            other => bail!("--args must be a JSON array, got {other}"),
        },
        None => Vec::new(),
    };
    let kwargs = match kwargs {
        Some(raw) => parse_object(raw, "--kwargs")?,
        None => Map::new(),
    };

    let mut request = RunRequest::new(graph).with_input(WorkflowInput { args, kwargs });
    if let Some(id) = id {
        request = request.with_id(id);
    }
    if let Some(raw) = metadata {
        request = request.with_metadata(Value::Object(parse_object(raw, "--metadata")?));
    }
    Ok(request)
}

fn parse_json(raw: &str, flag: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn parse_object(raw: &str, flag: &str) -> Result<Map<String, Value>> {
    match parse_json(raw, flag)? {
        Value::Object(map) => Ok(map),
        other => bail!("{flag} must be a JSON object, got {other}"),
    }
}

async fn handle_run(request: RunRequest, state: &AppState, mode: OutputMode) -> Result<()> {
    let events = state.manager.event_bus().subscribe();
    let handle = state.manager.run_async(request).await?;
    follow(handle, events, mode).await
}

async fn handle_resume(workflow_id: &str, state: &AppState, mode: OutputMode) -> Result<()> {
    let events = state.manager.event_bus().subscribe();
    let handle = state.manager.resume_async(workflow_id).await?;
    follow(handle, events, mode).await
}

/// Wait for a run while showing its progress. Ctrl-C leaves it RESUMABLE.
async fn follow(
    handle: WorkflowHandle,
    mut events: broadcast::Receiver<RunEvent>,
    mode: OutputMode,
) -> Result<()> {
    let workflow_id = handle.workflow_id().to_string();
    let spinner = mode.decorated().then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Running workflow {workflow_id}..."));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let result = handle.result();
    tokio::pin!(result);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            outcome = &mut result => break Some(outcome),
            _ = &mut ctrl_c => break None,
            event = events.recv() => {
                if let (Ok(event), Some(spinner)) = (event, &spinner) {
                    if event.workflow_id() == workflow_id {
                        spinner.set_message(describe_event(&event));
                    }
                }
            }
        }
    };
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }

    match outcome {
        None => {
            if !mode.json {
                eprintln!();
                eprintln!(
                    "  {} Interrupted. Resume with: {}",
                    style("!").yellow().bold(),
                    style(format!("keelson resume {workflow_id}")).dim()
                );
            }
            Ok(())
        }
        Some(Ok(output)) => {
            print_run_output(&workflow_id, &output, mode)?;
            Ok(())
        }
        Some(Err(e)) => {
            if mode.decorated() && matches!(e, WorkflowError::TaskExecution { .. }) {
                eprintln!(
                    "  Retry from the last checkpoint with: {}",
                    style(format!("keelson resume {workflow_id}")).dim()
                );
            }
            Err(anyhow::Error::new(e).context(format!("workflow '{workflow_id}' did not succeed")))
        }
    }
}

fn print_run_output(workflow_id: &str, output: &Value, mode: OutputMode) -> Result<()> {
    if mode.json {
        let out = serde_json::json!({
            "workflow_id": workflow_id,
            "status": WorkflowStatus::Successful,
            "output": output,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if mode.quiet {
        println!("{output}");
    } else {
        println!();
        println!(
            "  {} Workflow '{}' succeeded",
            style("*").green().bold(),
            style(workflow_id).cyan()
        );
        println!("  Output: {}", serde_json::to_string_pretty(output)?);
        println!();
    }
    Ok(())
}

/// One-line progress text for a lifecycle event.
pub fn describe_event(event: &RunEvent) -> String {
    match event {
        RunEvent::WorkflowStarted {
            workflow_id,
            resumed: true,
        } => format!("Resuming workflow {workflow_id}..."),
        RunEvent::WorkflowStarted { workflow_id, .. } => {
            format!("Running workflow {workflow_id}...")
        }
        RunEvent::TaskCommitted {
            task_name,
            retry_count,
            ..
        } => match retry_count {
            0 => format!("Task '{task_name}' done"),
            n => format!("Task '{task_name}' done after {n} retries"),
        },
        RunEvent::TaskFailed {
            task_name,
            error,
            will_retry: true,
            ..
        } => format!("Task '{task_name}' failed ({error}), retrying..."),
        RunEvent::TaskFailed {
            task_name, error, ..
        } => format!("Task '{task_name}' failed: {error}"),
        RunEvent::WorkflowFinished { status, .. } => format!("Workflow {status}"),
    }
}

async fn handle_resume_all(include_failed: bool, state: &AppState, mode: OutputMode) -> Result<()> {
    let handles = state.manager.resume_all(include_failed).await?;

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let workflow_id = handle.workflow_id().to_string();
        let outcome = handle.result().await;
        let status = state.manager.get_status(&workflow_id).await?;
        results.push((workflow_id, status, outcome.err().map(|e| e.to_string())));
    }

    if mode.json {
        let out: Vec<_> = results
            .iter()
            .map(|(id, status, error)| {
                serde_json::json!({"workflow_id": id, "status": status, "error": error})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if mode.quiet {
        return Ok(());
    }

    if results.is_empty() {
        println!();
        println!("  No workflows to resume.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Error"),
        ]);
    for (id, status, error) in &results {
        table.add_row(vec![
            Cell::new(id),
            status_cell(*status),
            Cell::new(error.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn handle_list(statuses: Vec<WorkflowStatus>, state: &AppState, mode: OutputMode) -> Result<()> {
    let filter = if statuses.is_empty() {
        StatusFilter::Any
    } else {
        statuses.into_iter().collect()
    };
    let workflows = state.manager.list_all(&filter).await?;

    if mode.json {
        let out: Vec<_> = workflows
            .iter()
            .map(|(id, status)| serde_json::json!({"workflow_id": id, "status": status}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if mode.quiet {
        for (id, _) in &workflows {
            println!("{id}");
        }
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows found.");
        println!(
            "  Start one with: {}",
            style("keelson run <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Workflow").fg(Color::Cyan), Cell::new("Status")]);
    for (id, status) in &workflows {
        table.add_row(vec![Cell::new(id), status_cell(*status)]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_status(workflow_id: &str, state: &AppState, mode: OutputMode) -> Result<()> {
    let status = state.manager.get_status(workflow_id).await?;

    if mode.json {
        let out = serde_json::json!({"workflow_id": workflow_id, "status": status});
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if mode.quiet {
        println!("{status}");
    } else {
        println!();
        println!("  {}  {}", style(workflow_id).cyan(), styled_status(status));
        println!();
    }
    Ok(())
}

async fn handle_metadata(
    workflow_id: &str,
    task: Option<&str>,
    state: &AppState,
    mode: OutputMode,
) -> Result<()> {
    let metadata = state.manager.get_metadata(workflow_id, task).await?;

    if mode.json || mode.quiet {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!();
    match &metadata {
        Metadata::Workflow(meta) => {
            println!("  Workflow: {}", style(&meta.workflow_id).cyan());
            println!("  Status:   {}", styled_status(meta.status));
            println!("  Started:  {}", format_time(meta.stats.start_time));
            println!("  Ended:    {}", format_time(meta.stats.end_time));
            if let Some(error) = &meta.error {
                println!("  Error:    {}", style(error).red());
            }
            print_user_metadata(&meta.user_metadata)?;
        }
        Metadata::Task(meta) => {
            println!(
                "  Task:     {} ({})",
                style(&meta.task_name).cyan(),
                meta.task_type
            );
            println!("  Workflow: {}", meta.workflow_id);
            match meta.status {
                Some(status) => println!("  Status:   {status}"),
                None => println!("  Status:   {}", style("not run").dim()),
            }
            if let Some(stats) = &meta.stats {
                println!("  Started:  {}", format_time(Some(stats.start_time)));
                println!("  Ended:    {}", format_time(Some(stats.end_time)));
                println!("  Retries:  {}", stats.retry_count);
            }
            println!("  Options:  {}", serde_json::to_string(&meta.options)?);
            print_user_metadata(&meta.user_metadata)?;
        }
    }
    println!();
    Ok(())
}

fn print_user_metadata(metadata: &Map<String, Value>) -> Result<()> {
    if !metadata.is_empty() {
        println!("  Metadata: {}", serde_json::to_string(metadata)?);
    }
    Ok(())
}

async fn handle_output(
    workflow_id: &str,
    task: Option<&str>,
    state: &AppState,
    mode: OutputMode,
) -> Result<()> {
    let output = state.manager.get_output(workflow_id, task).await?;

    if mode.json {
        let out = serde_json::json!({
            "workflow_id": workflow_id,
            "task": task,
            "output": output,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel / delete
// ---------------------------------------------------------------------------

async fn handle_cancel(workflow_id: &str, state: &AppState, mode: OutputMode) -> Result<()> {
    state.manager.cancel(workflow_id).await?;
    print_ack(workflow_id, "canceled", mode)
}

async fn handle_delete(workflow_id: &str, state: &AppState, mode: OutputMode) -> Result<()> {
    state.manager.delete(workflow_id).await?;
    print_ack(workflow_id, "deleted", mode)
}

fn print_ack(workflow_id: &str, action: &str, mode: OutputMode) -> Result<()> {
    if mode.json {
        let out = serde_json::json!({"workflow_id": workflow_id, "action": action});
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !mode.quiet {
        println!();
        println!(
            "  {} Workflow '{}' {action}",
            style("*").green().bold(),
            style(workflow_id).cyan()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn status_color(status: WorkflowStatus) -> Option<Color> {
    match status {
        WorkflowStatus::Successful => Some(Color::Green),
        WorkflowStatus::Failed => Some(Color::Red),
        WorkflowStatus::Running => Some(Color::Cyan),
        WorkflowStatus::Resumable => Some(Color::Yellow),
        WorkflowStatus::Canceled | WorkflowStatus::None => None,
    }
}

fn status_cell(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status);
    match status_color(status) {
        Some(color) => cell.fg(color),
        None => cell,
    }
}

fn styled_status(status: WorkflowStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        WorkflowStatus::Successful => text.green(),
        WorkflowStatus::Failed => text.red(),
        WorkflowStatus::Running => text.cyan(),
        WorkflowStatus::Resumable => text.yellow(),
        WorkflowStatus::Canceled | WorkflowStatus::None => text.dim(),
    }
}

fn format_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

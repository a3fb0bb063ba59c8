//! `toolgate run` — execute a workflow file with live progress output.

use console::style;
use toolgate_core::engine::{ProgressEvent, RunOptions};
use toolgate_core::task::{Task, WorkflowFile};
use toolgate_core::AppState;

pub async fn run(
    state: &AppState,
    file: &str,
    owner: Option<&str>,
    skip_auth_check: bool,
) -> Result<(), String> {
    let workflow = WorkflowFile::from_file(file).map_err(|e| e.to_string())?;
    let owner = owner
        .map(str::to_string)
        .or(workflow.owner_id.clone())
        .unwrap_or_else(|| "default".to_string());

    let total = workflow.steps.len();
    let task = Task::new(&owner, workflow.steps);
    state
        .task_store
        .save_task(&task)
        .await
        .map_err(|e| e.to_string())?;

    println!("Workflow : {}", file);
    println!("Owner    : {}", owner);
    println!("Steps    : {}", total);
    println!("Task     : {}", task.id);
    println!();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = state.engine.clone();
    let task_id = task.id.clone();
    let options = RunOptions {
        skip_auth_check,
        ..RunOptions::default()
    };
    let handle =
        tokio::spawn(async move { engine.run_streaming(&task_id, options, &tx).await });

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::StepStart {
                step_number,
                provider,
                action,
                ..
            } => {
                println!(
                    "── Step {}/{}: {} :: {} ──",
                    step_number, total, provider, action
                );
            }
            ProgressEvent::StepComplete { raw_output, .. } => {
                println!("   {} {}", style("ok").green(), preview(&raw_output));
                println!();
            }
            ProgressEvent::StepError { error, .. } => {
                println!("   {} {}", style("failed").red(), error);
                println!();
            }
            ProgressEvent::WorkflowComplete { summary } => {
                println!("{}", summary);
            }
            ProgressEvent::Error { message } => {
                println!("{} {}", style("aborted:").red(), message);
            }
        }
    }

    let result = handle
        .await
        .map_err(|e| format!("Run task panicked: {}", e))?
        .map_err(|e| e.to_string())?;

    let status = if result.overall_success {
        style("SUCCESS").green().to_string()
    } else {
        style("FAILED").red().to_string()
    };
    println!(
        "Status: {} ({}/{} steps succeeded)",
        status,
        result.steps.iter().filter(|s| s.success).count(),
        result.steps.len()
    );
    Ok(())
}

fn preview(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 80 {
        let cut: String = flat.chars().take(77).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

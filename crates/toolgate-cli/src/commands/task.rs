//! `toolgate task` — task inspection.

use toolgate_core::store::TaskStore;
use toolgate_core::AppState;

pub async fn list(state: &AppState, owner: &str) -> Result<(), String> {
    let tasks = state
        .task_store
        .list_by_owner(owner)
        .await
        .map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        println!("No tasks for '{}'.", owner);
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<12} {} steps  {}",
            task.id,
            task.status.as_str(),
            task.workflow.len(),
            task.created_at.to_rfc3339(),
        );
    }
    Ok(())
}

pub async fn get(state: &AppState, id: &str) -> Result<(), String> {
    let task = state
        .task_store
        .get_task(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Task not found: {}", id))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&task).map_err(|e| e.to_string())?
    );

    // Incrementally persisted step outcomes, useful for interrupted runs
    let steps = state
        .task_store
        .get_step_results(id)
        .await
        .map_err(|e| e.to_string())?;
    if task.result.is_none() && !steps.is_empty() {
        println!("\nPersisted step results (run incomplete):");
        println!(
            "{}",
            serde_json::to_string_pretty(&steps).map_err(|e| e.to_string())?
        );
    }
    Ok(())
}

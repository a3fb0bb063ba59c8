//! `toolgate providers` — registry listing and capability discovery.

use console::style;
use toolgate_core::AppState;

pub fn list(state: &AppState) -> Result<(), String> {
    let providers = state.registry.list();
    if providers.is_empty() {
        println!("No providers configured. Pass --config with a providers file.");
        return Ok(());
    }

    for descriptor in providers {
        let auth = if descriptor.auth_required {
            style("auth required").yellow().to_string()
        } else {
            "open".to_string()
        };
        println!(
            "{:<20} {:<6} {:<14} {}",
            descriptor.name,
            descriptor.transport.to_string(),
            auth,
            descriptor.description.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

pub async fn capabilities(state: &AppState, name: &str, owner: &str) -> Result<(), String> {
    let capabilities = state
        .pool
        .list_capabilities(owner, name)
        .await
        .map_err(|e| e.to_string())?;

    println!("{} capabilities for {}:", capabilities.len(), name);
    for capability in capabilities {
        println!(
            "  {:<24} {}",
            capability.name,
            capability.description.as_deref().unwrap_or("")
        );
    }

    // One-shot command: close what we opened
    state.pool.disconnect(owner, name).await;
    Ok(())
}

//! `toolgate verify` — auth verification management.

use toolgate_core::AppState;

pub async fn list(state: &AppState, owner: &str) -> Result<(), String> {
    let verified = state
        .auth_gate
        .list_verified(owner)
        .await
        .map_err(|e| e.to_string())?;
    if verified.is_empty() {
        println!("No verified providers for '{}'.", owner);
    } else {
        for provider in verified {
            println!("{}", provider);
        }
    }
    Ok(())
}

pub async fn grant(state: &AppState, owner: &str, provider: &str) -> Result<(), String> {
    let descriptor = state
        .registry
        .get(provider)
        .ok_or_else(|| format!("Unknown provider: {}", provider))?;
    if !descriptor.auth_required {
        println!("Note: '{}' does not require auth.", provider);
    }
    state
        .auth_gate
        .mark_verified(owner, provider)
        .await
        .map_err(|e| e.to_string())?;
    println!("Verified '{}' for owner '{}'.", provider, owner);
    Ok(())
}

pub async fn revoke(state: &AppState, owner: &str, provider: &str) -> Result<(), String> {
    let removed = state
        .auth_gate
        .revoke(owner, provider)
        .await
        .map_err(|e| e.to_string())?;
    if removed {
        println!("Revoked '{}' for owner '{}'.", provider, owner);
    } else {
        println!("Nothing to revoke.");
    }
    Ok(())
}

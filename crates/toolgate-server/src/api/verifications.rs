use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use toolgate_core::error::BrokerError;
use toolgate_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{owner_id}", get(list_verified).post(mark_verified))
        .route("/{owner_id}/{provider_name}", delete(revoke))
}

/// GET /api/verifications/{owner_id} — Providers verified for an owner.
async fn list_verified(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let providers = state.auth_gate.list_verified(&owner_id).await?;
    Ok(Json(serde_json::json!({ "verified": providers })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    provider_name: String,
}

/// POST /api/verifications/{owner_id} — Confirm a provider's credentials.
async fn mark_verified(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    if state.registry.get(&body.provider_name).is_none() {
        return Err(BrokerError::ProviderUnknown(body.provider_name));
    }
    state
        .auth_gate
        .mark_verified(&owner_id, &body.provider_name)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// DELETE /api/verifications/{owner_id}/{provider_name}
async fn revoke(
    State(state): State<AppState>,
    Path((owner_id, provider_name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let removed = state.auth_gate.revoke(&owner_id, &provider_name).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use toolgate_core::error::BrokerError;
use toolgate_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_providers))
        .route("/{name}/capabilities", get(list_capabilities))
}

/// GET /api/providers — List registered capability providers.
async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<serde_json::Value> = state
        .registry
        .list()
        .iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "displayName": d.display_name,
                "description": d.description,
                "category": d.category,
                "transport": d.transport.to_string(),
                "authRequired": d.auth_required,
                "authParams": d.auth_params,
            })
        })
        .collect();

    Json(serde_json::json!({ "providers": providers }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapabilitiesQuery {
    owner_id: Option<String>,
}

/// GET /api/providers/{name}/capabilities — Capability manifest, lazily
/// connecting on the caller's behalf.
async fn list_capabilities(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CapabilitiesQuery>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let owner = query.owner_id.as_deref().unwrap_or("default");
    let capabilities = state.pool.list_capabilities(owner, &name).await?;
    Ok(Json(serde_json::json!({
        "provider": name,
        "capabilities": capabilities,
    })))
}

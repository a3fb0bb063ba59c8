use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use toolgate_core::error::BrokerError;
use toolgate_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_connections).post(connect))
        .route("/{owner_id}/{provider_name}", delete(disconnect))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListConnectionsQuery {
    owner_id: Option<String>,
}

/// GET /api/connections — Connection summaries, optionally per owner.
async fn list_connections(
    State(state): State<AppState>,
    Query(query): Query<ListConnectionsQuery>,
) -> Json<serde_json::Value> {
    let connections = state
        .pool
        .list_connections(query.owner_id.as_deref())
        .await;
    Json(serde_json::json!({ "connections": connections }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    owner_id: String,
    provider_name: String,
}

/// POST /api/connections — Get or create a connection.
async fn connect(
    State(state): State<AppState>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let info = state
        .pool
        .connect(&body.owner_id, &body.provider_name)
        .await?;
    Ok(Json(serde_json::json!({ "connection": info })))
}

/// DELETE /api/connections/{owner_id}/{provider_name}
async fn disconnect(
    State(state): State<AppState>,
    Path((owner_id, provider_name)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let disconnected = state.pool.disconnect(&owner_id, &provider_name).await;
    Json(serde_json::json!({ "disconnected": disconnected }))
}

/// GET /api/pool — Read-only pool snapshot.
pub async fn pool_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.pool.status().await;
    Json(serde_json::json!({ "pool": status }))
}

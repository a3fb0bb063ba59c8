pub mod connections;
pub mod providers;
pub mod tasks;
pub mod verifications;

use axum::routing::get;
use axum::Router;

use toolgate_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/providers", providers::router())
        .nest("/api/connections", connections::router())
        .route("/api/pool", get(connections::pool_status))
        .nest("/api/tasks", tasks::router())
        .nest("/api/verifications", verifications::router())
}

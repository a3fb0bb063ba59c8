//! Toolgate Server — HTTP surface for the capability broker.
//!
//! A thin axum adapter on top of toolgate-core: provider listing,
//! connection management, pool introspection, task submission, and a
//! streamed progress feed for running workflows. All domain logic lives
//! in the core crate.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use toolgate_core::config::BrokerConfig;
use toolgate_core::{AppState, AppStateInner, Database};

/// Configuration for the Toolgate backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Optional path to the broker configuration file (providers, limits).
    pub config_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3710,
            db_path: "toolgate.db".to_string(),
            config_path: None,
        }
    }
}

/// Create a shared `AppState` from a database path and broker config.
///
/// Useful when the state must be shared between the HTTP server and other
/// consumers (e.g. CLI commands running in-process).
pub fn create_app_state(
    db_path: &str,
    config: BrokerConfig,
) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    let state: AppState = Arc::new(
        AppStateInner::new(db, config).map_err(|e| format!("Failed to build state: {}", e))?,
    );
    Ok(state)
}

/// Start the backend server. Returns the actual bound address.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    let broker_config = match &config.config_path {
        Some(path) => BrokerConfig::from_file(path).map_err(|e| e.to_string())?,
        None => BrokerConfig::default(),
    };

    tracing::info!(
        "Starting Toolgate backend server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path, broker_config)?;
    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    // Background idle sweep runs for the lifetime of the server
    state.start_sweeper();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Toolgate backend server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "toolgate-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

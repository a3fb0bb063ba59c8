//! `toolgate serve` — run the HTTP backend until interrupted.

use toolgate_server::{start_server_with_state, ServerConfig};

pub async fn run(
    host: String,
    port: u16,
    db_path: String,
    config_path: Option<String>,
) -> Result<(), String> {
    let config = match &config_path {
        Some(path) => {
            toolgate_core::config::BrokerConfig::from_file(path).map_err(|e| e.to_string())?
        }
        None => toolgate_core::config::BrokerConfig::default(),
    };

    let state = toolgate_server::create_app_state(&db_path, config)?;

    let server_config = ServerConfig {
        host,
        port,
        db_path,
        config_path,
    };
    let addr = start_server_with_state(server_config, state.clone()).await?;
    println!("Toolgate backend listening on http://{}", addr);
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for shutdown signal: {}", e))?;

    println!("Shutting down; closing provider connections...");
    state.pool.shutdown().await;
    Ok(())
}

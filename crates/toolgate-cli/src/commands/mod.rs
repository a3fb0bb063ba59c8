pub mod providers;
pub mod run;
pub mod serve;
pub mod task;
pub mod verify;

use std::sync::Arc;

use toolgate_core::config::BrokerConfig;
use toolgate_core::{AppState, AppStateInner, Database};

/// Build the shared application state, or exit with a readable error.
pub async fn init_state(db_path: &str, config_path: Option<&str>) -> AppState {
    let config = match config_path {
        Some(path) => match BrokerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => BrokerConfig::default(),
    };

    let db = match Database::open(db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match AppStateInner::new(db, config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

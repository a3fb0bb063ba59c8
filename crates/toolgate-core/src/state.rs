//! Shared application state for server and CLI entry points.
//!
//! Everything is constructed once at process start and passed by Arc —
//! no ambient global lookup.

use std::sync::Arc;

use crate::auth::SqliteAuthGate;
use crate::config::BrokerConfig;
use crate::db::Database;
use crate::engine::WorkflowEngine;
use crate::error::BrokerError;
use crate::pool::ConnectionPool;
use crate::registry::ProviderRegistry;
use crate::store::SqliteTaskStore;
use crate::transport::StdTransport;

/// Shared state accessible by all API handlers and CLI commands.
pub struct AppStateInner {
    pub db: Database,
    pub config: BrokerConfig,
    pub registry: Arc<ProviderRegistry>,
    pub pool: Arc<ConnectionPool>,
    pub engine: Arc<WorkflowEngine>,
    pub task_store: SqliteTaskStore,
    pub auth_gate: SqliteAuthGate,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(db: Database, config: BrokerConfig) -> Result<Self, BrokerError> {
        let registry = Arc::new(ProviderRegistry::from_providers(config.providers.clone())?);
        let pool = Arc::new(ConnectionPool::new(
            registry.clone(),
            Arc::new(StdTransport),
            config.pool.clone(),
        ));
        let task_store = SqliteTaskStore::new(db.clone());
        let auth_gate = SqliteAuthGate::new(db.clone());
        let engine = Arc::new(WorkflowEngine::new(
            pool.clone(),
            registry.clone(),
            Arc::new(task_store.clone()),
            Arc::new(auth_gate.clone()),
            config.engine.clone(),
        ));
        Ok(Self {
            db,
            config,
            registry,
            pool,
            engine,
            task_store,
            auth_gate,
        })
    }

    /// Start background maintenance (the idle sweeper).
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.pool.clone().spawn_sweeper()
    }
}

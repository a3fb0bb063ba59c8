//! Toolgate Core — Transport-agnostic domain logic for the Toolgate
//! capability broker.
//!
//! This crate contains the provider registry, connection pool, workflow
//! engine, persistence, and auth gate. It has **no HTTP framework
//! dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `toolgate-server`)
//! - CLI tools (via `toolgate-cli`)
//! - Embedded brokers inside other services
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `BrokerError` for use in
//!   axum handlers.

pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod state;
pub mod store;
pub mod task;
pub mod transport;

// Convenience re-exports
pub use db::Database;
pub use error::BrokerError;
pub use state::{AppState, AppStateInner};

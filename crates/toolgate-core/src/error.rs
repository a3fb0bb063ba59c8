//! Core error type for the Toolgate broker.
//!
//! `BrokerError` is used throughout the core domain (pool, engine, stores).
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Unknown provider: {0}")]
    ProviderUnknown(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Invocation failed: {0}")]
    InvocationFailure(String),

    #[error("Invocation timed out: {0}")]
    Timeout(String),

    #[error("Authorization required for: {}", .0.join(", "))]
    NeedsAuth(Vec<String>),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Whether an invocation that failed with this error may be retried.
    ///
    /// Transport-class failures are transient (the provider may come back,
    /// capacity may free up); everything else is definitive.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::TransportFailure(_)
                | BrokerError::InvocationFailure(_)
                | BrokerError::Timeout(_)
                | BrokerError::CapacityExceeded(_)
        )
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for BrokerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            BrokerError::ProviderUnknown(_) | BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            BrokerError::NeedsAuth(_) => StatusCode::FORBIDDEN,
            BrokerError::InvalidWorkflow(_)
            | BrokerError::MissingInput(_)
            | BrokerError::Config(_) => StatusCode::BAD_REQUEST,
            BrokerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BrokerError::TransportFailure(_)
            | BrokerError::NotConnected(_)
            | BrokerError::InvocationFailure(_) => StatusCode::BAD_GATEWAY,
            BrokerError::Database(_) | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

//! Broker configuration — pool limits, engine policy, provider list.
//!
//! Loaded once at startup from a YAML file; every field has a default so
//! an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::provider::ProviderDescriptor;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    #[serde(default)]
    pub pool: PoolLimits,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Capability providers known to this process.
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

impl BrokerConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, BrokerError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BrokerError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load a configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self, BrokerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }
}

/// Process-wide connection pool limits. Read at startup; not mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolLimits {
    /// Maximum live connections per owner.
    #[serde(default = "default_max_per_owner")]
    pub max_connections_per_owner: usize,

    /// Maximum live connections across all owners.
    #[serde(default = "default_max_total")]
    pub max_total_connections: usize,

    /// An Idle connection older than this is reclaimed by the sweeper.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Interval between idle sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound for one capability invocation.
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
}

fn default_max_per_owner() -> usize {
    8
}

fn default_max_total() -> usize {
    64
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_invoke_timeout() -> u64 {
    120
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections_per_owner: default_max_per_owner(),
            max_total_connections: default_max_total(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            invoke_timeout_secs: default_invoke_timeout(),
        }
    }
}

impl PoolLimits {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

/// Workflow engine retry and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum invocation attempts per step (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff between attempts, multiplied by the attempt number.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Providers whose step failure aborts the remaining workflow.
    #[serde(default)]
    pub hard_stop_providers: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            hard_stop_providers: Vec::new(),
        }
    }
}

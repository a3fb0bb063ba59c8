//! Provider descriptors — static configuration for capability providers.
//!
//! A provider is an external tool server reachable either by spawning a
//! child process (stdio) or over HTTP. Providers are data, not code: one
//! descriptor type covers every provider, polymorphic only over the
//! transport kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Transport kind for a capability provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("Unknown TransportKind: {}", other)),
        }
    }
}

/// Static configuration for one capability provider.
///
/// Immutable after load; owned by the process-wide [`ProviderRegistry`].
///
/// [`ProviderRegistry`]: crate::registry::ProviderRegistry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    /// Unique provider key.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub transport: TransportKind,
    /// Launch command (stdio transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variable overrides for the child process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Base URL (http transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP request headers (http transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Whether invoking this provider requires verified credentials.
    #[serde(default)]
    pub auth_required: bool,
    /// Names of the credential parameters the provider expects.
    #[serde(default)]
    pub auth_params: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderDescriptor {
    /// Expand `${ENV_VAR}` references in command, url, env values and
    /// header values. Applied once at registry load time.
    pub(crate) fn expand_env(&mut self) {
        if let Some(cmd) = &self.command {
            self.command = Some(resolve_env_vars(cmd));
        }
        if let Some(url) = &self.url {
            self.url = Some(resolve_env_vars(url));
        }
        if let Some(env) = &mut self.env {
            for val in env.values_mut() {
                *val = resolve_env_vars(val);
            }
        }
        if let Some(headers) = &mut self.headers {
            for val in headers.values_mut() {
                *val = resolve_env_vars(val);
            }
        }
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        // Support default value syntax: ${VAR:-default}
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
        }
    })
    .to_string()
}

//! Read-only provider registry, loaded once at startup.
//!
//! New providers are configuration entries in a YAML file, never new code.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::BrokerError;
use crate::provider::ProviderDescriptor;

/// Process-wide table of known capability providers.
///
/// Built once from configuration and shared by reference; never mutated
/// after load.
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderDescriptor>,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Build a registry from a list of descriptors.
    ///
    /// Duplicate names are rejected; `${ENV_VAR}` references are expanded.
    pub fn from_providers(
        providers: Vec<ProviderDescriptor>,
    ) -> Result<Self, BrokerError> {
        let mut map = HashMap::new();
        for mut descriptor in providers {
            descriptor.expand_env();
            let name = descriptor.name.clone();
            if map.insert(name.clone(), descriptor).is_some() {
                return Err(BrokerError::Config(format!(
                    "Duplicate provider name: {}",
                    name
                )));
            }
        }
        Ok(Self { providers: map })
    }

    /// Parse a registry from a YAML string (`providers:` list).
    pub fn from_yaml(yaml: &str) -> Result<Self, BrokerError> {
        let file: RegistryFile = serde_yaml::from_str(yaml)
            .map_err(|e| BrokerError::Config(format!("Failed to parse provider registry: {}", e)))?;
        Self::from_providers(file.providers)
    }

    /// Load a registry from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self, BrokerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("Failed to read provider file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Empty registry (useful for tests and fully programmatic setups).
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Look up an enabled provider by name.
    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(name).filter(|d| d.enabled)
    }

    /// List all enabled providers, sorted by name.
    pub fn list(&self) -> Vec<&ProviderDescriptor> {
        let mut out: Vec<_> = self.providers.values().filter(|d| d.enabled).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

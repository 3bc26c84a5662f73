//! Registry configuration
use crate::address::PATH_SEPARATOR;
use crate::load_balancer::LoadBalancingStrategy;
use crate::{RegistryError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Registry configuration, loadable from YAML with environment overrides
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root namespace segment all service records live under
    pub root: String,
    /// Upper bound for a single coordination store round-trip
    pub store_timeout_ms: u64,
    pub load_balancing: LoadBalancingStrategy,
    /// Also refresh on changes below provider nodes
    pub recursive_watch: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: "MyRPC".to_string(),
            store_timeout_ms: 5_000,
            load_balancing: LoadBalancingStrategy::default(),
            recursive_watch: true,
        }
    }
}

impl RegistryConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RegistryError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `REGISTRY_ROOT`, `REGISTRY_STORE_TIMEOUT_MS` and
    /// `REGISTRY_LOAD_BALANCING` from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = lookup("REGISTRY_ROOT") {
            debug!("Overriding registry root from environment: {}", root);
            self.root = root;
        }
        if let Some(timeout) = lookup("REGISTRY_STORE_TIMEOUT_MS") {
            self.store_timeout_ms = timeout.parse().map_err(|_| {
                RegistryError::Config(format!("invalid REGISTRY_STORE_TIMEOUT_MS: {}", timeout))
            })?;
        }
        if let Some(strategy) = lookup("REGISTRY_LOAD_BALANCING") {
            self.load_balancing = strategy.parse()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.is_empty() || self.root.contains(PATH_SEPARATOR) {
            return Err(RegistryError::Config(format!(
                "root must be a single non-empty path segment, got {:?}",
                self.root
            )));
        }
        if self.store_timeout_ms == 0 {
            return Err(RegistryError::Config(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.root, "MyRPC");
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.load_balancing, LoadBalancingStrategy::Random);
        assert!(config.recursive_watch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = RegistryConfig::from_yaml_str(
            "root: rpc\nload_balancing: round_robin\n",
        )
        .unwrap();
        assert_eq!(config.root, "rpc");
        assert_eq!(config.load_balancing, LoadBalancingStrategy::RoundRobin);
        assert_eq!(config.store_timeout_ms, 5_000);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_strategy() {
        let err = RegistryConfig::from_yaml_str("load_balancing: weighted\n").unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("REGISTRY_ROOT", "services"),
            ("REGISTRY_STORE_TIMEOUT_MS", "250"),
            ("REGISTRY_LOAD_BALANCING", "round-robin"),
        ]
        .into_iter()
        .collect();

        let config = RegistryConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.root, "services");
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.load_balancing, LoadBalancingStrategy::RoundRobin);
    }

    #[test]
    fn test_invalid_timeout_override() {
        let err = RegistryConfig::default()
            .with_overrides(|key| (key == "REGISTRY_STORE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = RegistryConfig::default();
        config.root = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = RegistryConfig::default();
        config.store_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}

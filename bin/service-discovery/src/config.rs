//! Daemon configuration
use anyhow::{Context, Result};
use registry_core::{Address, RegistryConfig};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable naming the YAML config file
pub const CONFIG_ENV: &str = "SERVICE_DISCOVERY_CONFIG";

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub service: String,
    pub address: Address,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub registry: RegistryConfig,
    /// Providers this process registers at startup
    pub providers: Vec<ProviderConfig>,
    /// Services resolved on every discovery cycle
    pub services: Vec<String>,
    pub discovery_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            providers: Vec::new(),
            services: Vec::new(),
            discovery_interval_secs: 30,
        }
    }
}

impl DaemonConfig {
    /// Load from the file named by `SERVICE_DISCOVERY_CONFIG`, falling back to
    /// defaults, then apply registry environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let yaml = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path))?;
                Self::from_yaml_str(&yaml)?
            }
            Err(_) => Self::default(),
        };
        config.registry = config.registry.with_env_overrides()?;
        config.registry.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid service-discovery config")
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::LoadBalancingStrategy;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert!(config.providers.is_empty());
        assert!(config.services.is_empty());
        assert_eq!(config.registry.root, "MyRPC");
        assert_eq!(config.discovery_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_yaml() {
        let config = DaemonConfig::from_yaml_str(
            r#"
registry:
  root: rpc
  load_balancing: round_robin
providers:
  - service: echo
    address: "10.0.0.1:9000"
  - service: echo
    address: "10.0.0.2:9000"
services: [echo]
discovery_interval_secs: 5
"#,
        )
        .unwrap();

        assert_eq!(config.registry.root, "rpc");
        assert_eq!(config.registry.load_balancing, LoadBalancingStrategy::RoundRobin);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].address.port(), 9000);
        assert_eq!(config.services, vec!["echo".to_string()]);
        assert_eq!(config.discovery_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_provider_address() {
        let result = DaemonConfig::from_yaml_str(
            "providers:\n  - service: echo\n    address: \"10.0.0.1\"\n",
        );
        assert!(result.is_err());
    }
}

use anyhow::Result;
use registry_core::{MemoryStore, RegisterOutcome, RegistryError, ServiceRegistry};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting service-discovery daemon...");

    let config = DaemonConfig::load()?;
    info!("Registry root: /{}", config.registry.root);
    info!("  - Store timeout: {:?}", config.registry.store_timeout());
    info!("  - Load balancing: {:?}", config.registry.load_balancing);
    if config.providers.is_empty() && config.services.is_empty() {
        warn!(
            "No providers or services configured; set {} to a YAML config file",
            config::CONFIG_ENV
        );
    }

    let store = MemoryStore::new();

    // Provider side: one session holding this process's ephemeral nodes
    let provider = ServiceRegistry::new(Arc::new(store.connect()), config.registry.clone())?;
    for entry in &config.providers {
        match provider.register(&entry.service, &entry.address).await? {
            RegisterOutcome::Registered => {}
            RegisterOutcome::AlreadyRegistered => {
                debug!("{} already provided at {}", entry.service, entry.address);
            }
        }
    }

    // Consumer side
    let consumer = ServiceRegistry::new(Arc::new(store.connect()), config.registry.clone())?;

    let mut ticker = tokio::time::interval(config.discovery_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let resolved = discover_services(&consumer, &config.services).await;
                info!("Resolved {} of {} services", resolved, config.services.len());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    consumer.shutdown().await?;
    provider.shutdown().await?;

    match consumer.metrics().gather() {
        Ok(metrics) => debug!("Final consumer metrics:\n{}", metrics),
        Err(e) => warn!("Failed to gather metrics: {}", e),
    }

    info!("service-discovery daemon stopped");
    Ok(())
}

async fn discover_services(registry: &ServiceRegistry, services: &[String]) -> usize {
    let mut count = 0;

    for service in services {
        match registry.discover(service).await {
            Ok(address) => {
                debug!("{} -> {}", service, address);
                count += 1;
            }
            Err(RegistryError::NoProvidersAvailable(_)) => {
                warn!("No live providers for {}", service);
            }
            Err(e) => {
                error!("Error discovering {}: {}", service, e);
            }
        }
    }

    count
}

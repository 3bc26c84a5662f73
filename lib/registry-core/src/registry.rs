//! Service registry: provider registration and consumer discovery

use crate::cache::DiscoveryCache;
use crate::config::RegistryConfig;
use crate::load_balancer::LoadBalancer;
use crate::metrics::RegistryMetrics;
use crate::store::{with_timeout, CoordinationStore, StoreError, Subscription};
use crate::watch::{fetch_providers, WatchHandler};
use crate::{Address, RegistryError, Result, ServiceName};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Result of a registration that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// The same provider node is still held by a live session
    AlreadyRegistered,
}

impl RegisterOutcome {
    fn label(self) -> &'static str {
        match self {
            RegisterOutcome::Registered => "registered",
            RegisterOutcome::AlreadyRegistered => "already_registered",
        }
    }
}

/// ServiceRegistry registers providers in the coordination store and
/// resolves service names to provider addresses through a watched cache
pub struct ServiceRegistry {
    config: RegistryConfig,
    store: Arc<dyn CoordinationStore>,
    cache: Arc<DiscoveryCache>,
    balancer: Arc<dyn LoadBalancer>,
    // At most one subscription per service name
    subscriptions: Mutex<HashMap<ServiceName, Arc<OnceCell<Subscription>>>>,
    metrics: RegistryMetrics,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let metrics =
            RegistryMetrics::new().map_err(|e| RegistryError::Internal(e.to_string()))?;
        Ok(Self {
            balancer: config.load_balancing.build(),
            config,
            store,
            cache: Arc::new(DiscoveryCache::new()),
            subscriptions: Mutex::new(HashMap::new()),
            metrics,
        })
    }

    /// Replace the load balancer built from the configured strategy
    pub fn with_load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Store path of the record for `service`
    pub fn service_path(&self, service: &ServiceName) -> String {
        format!("/{}/{}", self.config.root, service)
    }

    /// Register `address` as a live provider of `service`
    pub async fn register(&self, service: &str, address: &Address) -> Result<RegisterOutcome> {
        let service = ServiceName::new(service)?;
        let timeout = self.config.store_timeout();
        let service_path = self.service_path(&service);

        // Providers of one service race to create the record.
        match with_timeout(timeout, "ensure_path", self.store.ensure_path(&service_path)).await {
            Ok(()) | Err(StoreError::NodeExists(_)) => {}
            Err(e) => return Err(self.registration_failed(e)),
        }

        let provider_path = format!("{}/{}", service_path, address);
        let outcome = match with_timeout(
            timeout,
            "create_ephemeral",
            self.store.create_ephemeral(&provider_path),
        )
        .await
        {
            Ok(()) => {
                info!("Registered provider {} for service: {}", address, service);
                RegisterOutcome::Registered
            }
            Err(StoreError::NodeExists(_)) => {
                warn!(
                    "Provider {} is already registered for service {}; the previous session's node will expire on its own",
                    address, service
                );
                RegisterOutcome::AlreadyRegistered
            }
            Err(e) => return Err(self.registration_failed(e)),
        };

        self.metrics
            .registrations_total
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }

    fn registration_failed(&self, err: StoreError) -> RegistryError {
        self.metrics
            .registrations_total
            .with_label_values(&["failed"])
            .inc();
        match err {
            StoreError::InvalidPath(path) => RegistryError::InvalidArgument(path),
            other => RegistryError::StoreUnavailable(other.to_string()),
        }
    }

    /// Resolve `service` to one provider address
    pub async fn discover(&self, service: &str) -> Result<Address> {
        let result = self.resolve(service).await;
        if let Err(e) = &result {
            self.metrics
                .discover_errors_total
                .with_label_values(&[e.kind()])
                .inc();
        }
        result
    }

    async fn resolve(&self, service: &str) -> Result<Address> {
        let service = ServiceName::new(service)?;

        let cached = self.cache.get(&service).await;
        if let Some(entry) = &cached {
            if !entry.providers.is_empty() {
                self.metrics.cache_hits_total.inc();
                return self.balancer.select(&service, &entry.providers);
            }
        }
        self.metrics.cache_misses_total.inc();

        // Subscribe before listing so a change after the read still reaches the cache.
        let watched = match self.ensure_watch(&service).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to watch service {}: {}", service, e);
                false
            }
        };

        let path = self.service_path(&service);
        let providers = fetch_providers(self.store.as_ref(), &path, self.config.store_timeout())
            .await
            .map_err(|e| match e {
                StoreError::NoNode(_) => RegistryError::ServiceUnknown(service.to_string()),
                other => RegistryError::ServiceUnavailable(format!("{}: {}", service, other)),
            })?;
        debug!(
            "Cache miss for service {}: fetched {} providers",
            service,
            providers.len()
        );

        // Unwatched lists are served once and not cached; the next call retries.
        let providers = if watched {
            let expected = cached.map(|entry| entry.version);
            self.cache
                .replace_if_unchanged(service.clone(), expected, providers)
                .await
        } else {
            Arc::from(providers)
        };

        if providers.is_empty() {
            return Err(RegistryError::NoProvidersAvailable(service.to_string()));
        }
        self.balancer.select(&service, &providers)
    }

    /// Subscribe to membership changes for `service` ahead of discovery
    pub async fn watch(&self, service: &str) -> Result<()> {
        let service = ServiceName::new(service)?;
        self.ensure_watch(&service).await
    }

    async fn ensure_watch(&self, service: &ServiceName) -> Result<()> {
        // The map lock is released before the store round-trip; callers for
        // the same name wait on its slot.
        let slot = self
            .subscriptions
            .lock()
            .await
            .entry(service.clone())
            .or_default()
            .clone();
        slot.get_or_try_init(|| self.subscribe(service)).await?;
        Ok(())
    }

    async fn subscribe(&self, service: &ServiceName) -> Result<Subscription> {
        let path = self.service_path(service);
        let timeout = self.config.store_timeout();
        let handler = Arc::new(WatchHandler::new(
            service.clone(),
            path.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.metrics.clone(),
            timeout,
        ));
        let subscription = with_timeout(
            timeout,
            "subscribe",
            self.store
                .subscribe(&path, self.config.recursive_watch, handler),
        )
        .await
        .map_err(|e| RegistryError::StoreUnavailable(e.to_string()))?;

        info!("Watching {} for provider changes", path);
        Ok(subscription)
    }

    /// Current cache entry for `service`, if it has been discovered
    pub async fn cached_providers(&self, service: &str) -> Option<Arc<[Address]>> {
        let service = ServiceName::new(service).ok()?;
        self.cache.get(&service).await.map(|entry| entry.providers)
    }

    pub async fn watched_service_count(&self) -> usize {
        self.subscriptions
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Cancel every subscription and close the store session
    pub async fn shutdown(&self) -> Result<()> {
        let slots: Vec<Arc<OnceCell<Subscription>>> = self
            .subscriptions
            .lock()
            .await
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let mut count = 0;
        for slot in slots {
            match Arc::try_unwrap(slot) {
                Ok(slot) => {
                    if let Some(subscription) = slot.into_inner() {
                        subscription.cancel();
                        count += 1;
                    }
                }
                // Still held by an in-flight watch call; aborted when it lets go
                Err(slot) => count += usize::from(slot.initialized()),
            }
        }
        info!("Cancelled {} watch subscriptions", count);

        self.store
            .close()
            .await
            .map_err(|e| RegistryError::StoreUnavailable(e.to_string()))?;
        info!("Closed coordination store session");
        Ok(())
    }
}

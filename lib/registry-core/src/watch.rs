//! Keeps cache entries coherent with store-side membership changes

use crate::cache::DiscoveryCache;
use crate::metrics::RegistryMetrics;
use crate::store::{with_timeout, ChildEvent, ChildEventListener, CoordinationStore, StoreResult};
use crate::{Address, ServiceName};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetch and parse the live provider list under `path`.
///
/// Children that are not valid `host:port` segments are skipped.
pub(crate) async fn fetch_providers(
    store: &dyn CoordinationStore,
    path: &str,
    timeout: Duration,
) -> StoreResult<Vec<Address>> {
    let children = with_timeout(timeout, "list_children", store.list_children(path)).await?;
    let providers = children
        .into_iter()
        .filter_map(|child| match child.parse::<Address>() {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Ignoring malformed provider node {}/{}: {}", path, child, e);
                None
            }
        })
        .collect();
    Ok(providers)
}

/// Refreshes one service's cache entry whenever its children change.
///
/// Every event triggers a full re-fetch, so duplicated or reordered events
/// converge on the store's current membership. A failed re-fetch keeps the
/// previous entry.
pub struct WatchHandler {
    service: ServiceName,
    path: String,
    store: Arc<dyn CoordinationStore>,
    cache: Arc<DiscoveryCache>,
    metrics: RegistryMetrics,
    timeout: Duration,
}

impl WatchHandler {
    pub fn new(
        service: ServiceName,
        path: String,
        store: Arc<dyn CoordinationStore>,
        cache: Arc<DiscoveryCache>,
        metrics: RegistryMetrics,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            path,
            store,
            cache,
            metrics,
            timeout,
        }
    }

    /// Replace the cache entry with the store's current provider list.
    ///
    /// Installs unconditionally and bumps the entry version.
    pub async fn refresh(&self) -> StoreResult<usize> {
        let providers = fetch_providers(self.store.as_ref(), &self.path, self.timeout).await?;
        let count = providers.len();
        self.cache.replace(self.service.clone(), providers).await;
        Ok(count)
    }
}

#[async_trait]
impl ChildEventListener for WatchHandler {
    async fn on_child_event(&self, event: ChildEvent) {
        debug!(
            "{:?} on {} for service {}",
            event.kind, event.path, self.service
        );

        match self.refresh().await {
            Ok(count) => {
                self.metrics
                    .watch_refreshes_total
                    .with_label_values(&["ok"])
                    .inc();
                debug!("Refreshed service {}: {} providers", self.service, count);
            }
            Err(e) => {
                self.metrics
                    .watch_refreshes_total
                    .with_label_values(&["failed"])
                    .inc();
                warn!(
                    "Failed to refresh providers for service {}, keeping cached entry: {}",
                    self.service, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChildEventKind, MemoryStore};

    fn handler(store: &MemoryStore, cache: Arc<DiscoveryCache>) -> (WatchHandler, RegistryMetrics) {
        let metrics = RegistryMetrics::new().unwrap();
        let handler = WatchHandler::new(
            ServiceName::new("echo").unwrap(),
            "/MyRPC/echo".to_string(),
            Arc::new(store.connect()),
            cache,
            metrics.clone(),
            Duration::from_secs(1),
        );
        (handler, metrics)
    }

    fn removed(path: &str) -> ChildEvent {
        ChildEvent {
            kind: ChildEventKind::ChildRemoved,
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_replaces_entry() {
        let store = MemoryStore::new();
        let provider = store.connect();
        provider.ensure_path("/MyRPC/echo").await.unwrap();
        provider.create_ephemeral("/MyRPC/echo/10.0.0.2:9000").await.unwrap();

        let cache = Arc::new(DiscoveryCache::new());
        let echo = ServiceName::new("echo").unwrap();
        cache
            .replace(
                echo.clone(),
                vec!["10.0.0.1:9000".parse().unwrap(), "10.0.0.2:9000".parse().unwrap()],
            )
            .await;

        let (handler, metrics) = handler(&store, cache.clone());
        handler.on_child_event(removed("/MyRPC/echo/10.0.0.1:9000")).await;

        let entry = cache.get(&echo).await.unwrap();
        assert_eq!(entry.providers.as_ref(), &["10.0.0.2:9000".parse::<Address>().unwrap()]);
        assert_eq!(metrics.watch_refreshes_total.with_label_values(&["ok"]).get(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_entry() {
        let store = MemoryStore::new();
        let provider = store.connect();
        provider.ensure_path("/MyRPC/echo").await.unwrap();

        let cache = Arc::new(DiscoveryCache::new());
        let echo = ServiceName::new("echo").unwrap();
        cache
            .replace(echo.clone(), vec!["10.0.0.1:9000".parse().unwrap()])
            .await;

        let (handler, metrics) = handler(&store, cache.clone());
        store.set_available(false);
        handler.on_child_event(removed("/MyRPC/echo/10.0.0.1:9000")).await;

        assert_eq!(cache.get(&echo).await.unwrap().providers.len(), 1);
        assert_eq!(
            metrics.watch_refreshes_total.with_label_values(&["failed"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_malformed_children_are_skipped() {
        let store = MemoryStore::new();
        let session = store.connect();
        session.ensure_path("/MyRPC/echo").await.unwrap();
        session.create_ephemeral("/MyRPC/echo/10.0.0.1:9000").await.unwrap();
        session.create_ephemeral("/MyRPC/echo/garbage").await.unwrap();

        let providers = fetch_providers(&session, "/MyRPC/echo", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(providers, vec!["10.0.0.1:9000".parse::<Address>().unwrap()]);
    }
}

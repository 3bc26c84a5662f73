//! Local discovery cache
use crate::{Address, ServiceName};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One service's provider list and the version it was installed at
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub providers: Arc<[Address]>,
    pub version: u64,
}

/// Known providers per service name.
///
/// Entries are immutable slices swapped wholesale, so readers see either the
/// previous list or the new one, never a partial update. Every install gets
/// a fresh version. Entries are never evicted.
pub struct DiscoveryCache {
    entries: RwLock<HashMap<ServiceName, CacheEntry>>,
    next_version: AtomicU64,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    pub async fn get(&self, service: &ServiceName) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries.get(service).cloned()
    }

    /// Replace the provider list for `service`, returning the new entry
    pub async fn replace(&self, service: ServiceName, providers: Vec<Address>) -> Arc<[Address]> {
        let mut entries = self.entries.write().await;
        self.install(&mut entries, service, providers)
    }

    /// Install `providers` only if the entry is still at `expected`.
    ///
    /// `expected` is the version seen before the providers were fetched, or
    /// `None` if there was no entry. When the entry has been replaced in the
    /// meantime the newer list is kept and returned.
    pub async fn replace_if_unchanged(
        &self,
        service: ServiceName,
        expected: Option<u64>,
        providers: Vec<Address>,
    ) -> Arc<[Address]> {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&service) {
            if Some(current.version) != expected {
                debug!(
                    "Discarding stale provider list for service {}: entry moved to version {}",
                    service, current.version
                );
                return current.providers.clone();
            }
        }
        self.install(&mut entries, service, providers)
    }

    fn install(
        &self,
        entries: &mut HashMap<ServiceName, CacheEntry>,
        service: ServiceName,
        providers: Vec<Address>,
    ) -> Arc<[Address]> {
        let providers: Arc<[Address]> = Arc::from(providers);
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Cached {} providers for service: {} (version {})",
            providers.len(),
            service,
            version
        );
        entries.insert(
            service,
            CacheEntry {
                providers: providers.clone(),
                version,
            },
        );
        providers
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<Address> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_entry() {
        let cache = DiscoveryCache::new();
        let echo = ServiceName::new("echo").unwrap();
        assert!(cache.get(&echo).await.is_none());

        cache
            .replace(echo.clone(), addrs(&["10.0.0.1:9000", "10.0.0.2:9000"]))
            .await;
        let before = cache.get(&echo).await.unwrap();

        cache.replace(echo.clone(), addrs(&["10.0.0.2:9000"])).await;
        let after = cache.get(&echo).await.unwrap();

        // A reader holding the old entry keeps a consistent snapshot
        assert_eq!(before.providers.len(), 2);
        assert_eq!(after.providers.as_ref(), addrs(&["10.0.0.2:9000"]).as_slice());
        assert!(after.version > before.version);
    }

    #[tokio::test]
    async fn test_empty_entry_is_kept() {
        let cache = DiscoveryCache::new();
        let echo = ServiceName::new("echo").unwrap();
        cache.replace(echo.clone(), Vec::new()).await;
        assert!(cache.get(&echo).await.unwrap().providers.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_replace_installs_when_unchanged() {
        let cache = DiscoveryCache::new();
        let echo = ServiceName::new("echo").unwrap();

        let installed = cache
            .replace_if_unchanged(echo.clone(), None, addrs(&["10.0.0.1:9000"]))
            .await;
        assert_eq!(installed.as_ref(), addrs(&["10.0.0.1:9000"]).as_slice());

        let seen = cache.get(&echo).await.unwrap().version;
        let installed = cache
            .replace_if_unchanged(echo.clone(), Some(seen), addrs(&["10.0.0.2:9000"]))
            .await;
        assert_eq!(installed.as_ref(), addrs(&["10.0.0.2:9000"]).as_slice());
    }

    #[tokio::test]
    async fn test_conditional_replace_keeps_newer_entry() {
        let cache = DiscoveryCache::new();
        let echo = ServiceName::new("echo").unwrap();
        cache.replace(echo.clone(), Vec::new()).await;
        let seen = cache.get(&echo).await.unwrap().version;

        // A watch refresh lands while a slower read is still in flight
        cache.replace(echo.clone(), addrs(&["10.0.0.2:9000"])).await;

        let kept = cache
            .replace_if_unchanged(echo.clone(), Some(seen), Vec::new())
            .await;
        assert_eq!(kept.as_ref(), addrs(&["10.0.0.2:9000"]).as_slice());
        assert_eq!(
            cache.get(&echo).await.unwrap().providers.as_ref(),
            addrs(&["10.0.0.2:9000"]).as_slice()
        );

        // An entry that appeared after an empty lookup also wins
        let other = ServiceName::new("other").unwrap();
        cache.replace(other.clone(), addrs(&["10.0.0.3:9000"])).await;
        let kept = cache.replace_if_unchanged(other, None, Vec::new()).await;
        assert_eq!(kept.as_ref(), addrs(&["10.0.0.3:9000"]).as_slice());
    }
}

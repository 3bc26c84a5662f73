//! Prometheus metrics for registration and discovery

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Registry metrics on a private Prometheus registry
#[derive(Clone)]
pub struct RegistryMetrics {
    /// Discoveries answered from the local cache
    pub cache_hits_total: IntCounter,
    /// Discoveries that had to query the coordination store
    pub cache_misses_total: IntCounter,
    /// Registrations by outcome
    pub registrations_total: IntCounterVec,
    /// Failed discoveries by error kind
    pub discover_errors_total: IntCounterVec,
    /// Watch-driven cache refreshes by result
    pub watch_refreshes_total: IntCounterVec,
    pub registry: Arc<Registry>,
}

impl RegistryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let cache_hits_total = IntCounter::new(
            "registry_cache_hits_total",
            "Discoveries served from the local cache",
        )?;
        let cache_misses_total = IntCounter::new(
            "registry_cache_misses_total",
            "Discoveries that queried the coordination store",
        )?;
        let registrations_total = IntCounterVec::new(
            Opts::new("registry_registrations_total", "Provider registrations by outcome"),
            &["outcome"],
        )?;
        let discover_errors_total = IntCounterVec::new(
            Opts::new("registry_discover_errors_total", "Failed discoveries by error kind"),
            &["kind"],
        )?;
        let watch_refreshes_total = IntCounterVec::new(
            Opts::new(
                "registry_watch_refreshes_total",
                "Watch-driven cache refreshes by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(discover_errors_total.clone()))?;
        registry.register(Box::new(watch_refreshes_total.clone()))?;

        Ok(Self {
            cache_hits_total,
            cache_misses_total,
            registrations_total,
            discover_errors_total,
            watch_refreshes_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = RegistryMetrics::new().expect("Failed to create metrics");
        assert!(metrics.gather().is_ok());
    }

    #[test]
    fn test_clones_share_registry() {
        let metrics = RegistryMetrics::new().expect("Failed to create metrics");
        let clone = metrics.clone();
        clone.cache_hits_total.inc();
        assert_eq!(metrics.cache_hits_total.get(), 1);
    }

    #[test]
    fn test_text_format() {
        let metrics = RegistryMetrics::new().expect("Failed to create metrics");
        metrics
            .registrations_total
            .with_label_values(&["registered"])
            .inc();

        let text = metrics.gather().expect("Failed to gather metrics");
        assert!(text.contains("# HELP"));
        assert!(text.contains("# TYPE"));
        assert!(text.contains("registry_registrations_total{outcome=\"registered\"} 1"));
    }
}

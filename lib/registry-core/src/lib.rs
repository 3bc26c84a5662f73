//! Service registry and discovery for RPC providers
//!
//! This library provides:
//! - Provider registration as ephemeral nodes in a coordination store
//! - Cached, watch-invalidated discovery of provider addresses
//! - Load balancing across the providers of a service

pub mod address;
pub mod cache;
pub mod config;
pub mod error;
pub mod load_balancer;
pub mod metrics;
pub mod registry;
pub mod store;
pub mod watch;

pub use address::{Address, ServiceName};
pub use cache::{CacheEntry, DiscoveryCache};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use metrics::RegistryMetrics;
pub use registry::{RegisterOutcome, ServiceRegistry};
pub use store::{CoordinationStore, MemorySession, MemoryStore};
pub use watch::WatchHandler;

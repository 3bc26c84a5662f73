//! Load balancing strategies for choosing one provider among candidates

use crate::{Address, RegistryError, Result, ServiceName};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Uniform random pick among candidates
    #[default]
    Random,
    /// Rotate through candidates with a cursor per service
    RoundRobin,
}

impl LoadBalancingStrategy {
    /// Build a load balancer for this strategy
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            LoadBalancingStrategy::Random => Arc::new(RandomLoadBalancer),
            LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
        }
    }
}

impl std::str::FromStr for LoadBalancingStrategy {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(LoadBalancingStrategy::Random),
            "round_robin" | "round-robin" => Ok(LoadBalancingStrategy::RoundRobin),
            other => Err(RegistryError::Config(format!(
                "unknown load balancing strategy: {}",
                other
            ))),
        }
    }
}

/// Selects one provider from a non-empty candidate list
pub trait LoadBalancer: Send + Sync {
    /// Fails with `InvalidArgument` when `candidates` is empty
    fn select(&self, service: &ServiceName, candidates: &[Address]) -> Result<Address>;
}

fn ensure_candidates(service: &ServiceName, candidates: &[Address]) -> Result<()> {
    if candidates.is_empty() {
        return Err(RegistryError::InvalidArgument(format!(
            "no candidates to balance for service {}",
            service
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl LoadBalancer for RandomLoadBalancer {
    fn select(&self, service: &ServiceName, candidates: &[Address]) -> Result<Address> {
        ensure_candidates(service, candidates)?;
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index].clone())
    }
}

#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    cursors: RwLock<HashMap<ServiceName, Arc<AtomicUsize>>>,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&self, service: &ServiceName) -> Arc<AtomicUsize> {
        if let Some(cursor) = self
            .cursors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
        {
            return cursor.clone();
        }
        self.cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(service.clone())
            .or_default()
            .clone()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select(&self, service: &ServiceName, candidates: &[Address]) -> Result<Address> {
        ensure_candidates(service, candidates)?;
        // The list may have changed size since the last call; wrap on the current length.
        let current = self.cursor(service).fetch_add(1, Ordering::Relaxed);
        Ok(candidates[current % candidates.len()].clone())
    }
}

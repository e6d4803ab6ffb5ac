//! Per-process registry of circuit breakers.
//!
//! The registry is an explicit object owned by the composition root. Every
//! caller asking for the same dependency name receives the same shared breaker.

use crate::application::circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, Dependency, SharedCircuitBreaker,
};
use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::domain::error::ConfigError;
use dashmap::DashMap;
use std::sync::Arc;

/// Registry mapping dependency names to shared breakers.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<String, SharedCircuitBreaker>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            clock,
            metrics,
            default_config: CircuitBreakerConfig::default(),
        }
    }

    /// Registry pre-populated with breakers for every preset dependency.
    pub fn with_presets(clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        let registry = Self::new(clock, metrics);
        for dependency in Dependency::ALL {
            registry.insert(
                dependency.as_str(),
                CircuitBreakerConfig::for_dependency(dependency),
            );
        }
        registry
    }

    /// Config used for names created on demand by [`get_or_create`](Self::get_or_create).
    pub fn with_default_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.default_config = config;
        self
    }

    fn build(&self, name: &str, config: CircuitBreakerConfig) -> SharedCircuitBreaker {
        Arc::new(
            CircuitBreaker::new(name, config, Arc::clone(&self.clock))
                .with_metrics(self.metrics.clone()),
        )
    }

    /// Register a breaker for `name`, replacing any existing one.
    fn insert(&self, name: &str, config: CircuitBreakerConfig) -> SharedCircuitBreaker {
        let breaker = self.build(name, config);
        self.breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Register a validated breaker for `name`, replacing any existing one.
    pub fn register(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Result<SharedCircuitBreaker, ConfigError> {
        config.validate(name)?;
        Ok(self.insert(name, config))
    }

    /// Shared breaker for `name`, created with the default config if absent.
    pub fn get_or_create(&self, name: &str) -> SharedCircuitBreaker {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| self.build(name, self.default_config));
        Arc::clone(entry.value())
    }

    /// Shared breaker for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<SharedCircuitBreaker> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Operator action: close the breaker for `name`. Returns `false` if unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

//! Periodic admission reports.
//!
//! Collects counters, breaker states and the top abusers into one report and
//! can emit it on a fixed interval from a background task.

use crate::application::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::application::metrics::{Metrics, MetricsSnapshot};
use crate::application::registry::BreakerRegistry;
use crate::domain::error::ConfigError;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

/// Configuration for report emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    /// How often to emit reports
    pub interval: Duration,
    /// Number of abusers included in each report
    pub top_n: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            top_n: 10,
        }
    }
}

impl ReporterConfig {
    /// Create a reporter config with the specified interval.
    ///
    /// # Errors
    /// Returns `ConfigError::ZeroReportInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }
        Ok(Self {
            interval,
            ..Self::default()
        })
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }
}

/// One admission report.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionReport {
    pub metrics: MetricsSnapshot,
    pub breakers: Vec<BreakerSnapshot>,
    /// Keys with the most rejections, highest first
    pub top_abusers: Vec<(String, u64)>,
}

impl AdmissionReport {
    /// Breakers not currently closed.
    pub fn tripped_breakers(&self) -> impl Iterator<Item = &BreakerSnapshot> {
        self.breakers
            .iter()
            .filter(|b| b.state != CircuitState::Closed)
    }

    /// Write the report to the `tracing` pipeline.
    pub fn log(&self) {
        info!(
            total = self.metrics.total_requests(),
            blocked = self.metrics.blocked_requests(),
            quota_rejections = self.metrics.quota_rejections,
            blacklist_denials = self.metrics.blacklist_denials,
            degraded = self.metrics.degraded_decisions,
            escalations = self.metrics.escalations,
            circuit_rejections = self.metrics.circuit_rejections,
            "admission report"
        );
        for breaker in self.tripped_breakers() {
            warn!(
                dependency = %breaker.name,
                state = %breaker.state,
                failures = breaker.failure_count,
                "circuit not closed"
            );
        }
        for (rank, (key, rejections)) in self.top_abusers.iter().enumerate() {
            info!(rank = rank + 1, key = %key, rejections, "top abuser");
        }
    }
}

/// Builds and emits periodic admission reports.
#[derive(Debug, Clone)]
pub struct AbuseReporter {
    metrics: Metrics,
    registry: BreakerRegistry,
    config: ReporterConfig,
}

impl AbuseReporter {
    pub fn new(metrics: Metrics, registry: BreakerRegistry, config: ReporterConfig) -> Self {
        Self {
            metrics,
            registry,
            config,
        }
    }

    /// Collect a report of the current state.
    pub fn collect(&self) -> AdmissionReport {
        AdmissionReport {
            metrics: self.metrics.snapshot(),
            breakers: self.registry.snapshots(),
            top_abusers: self.metrics.top_abusers(self.config.top_n),
        }
    }

    /// Start emitting reports periodically.
    ///
    /// This spawns a background task that hands a report to `emit_fn` at the
    /// configured interval, starting immediately.
    pub fn start<F>(self, mut emit_fn: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(AdmissionReport) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);

            loop {
                ticker.tick().await;
                emit_fn(self.collect());
            }
        })
    }

    /// Start logging reports through `tracing` periodically.
    pub fn start_logging(self) -> tokio::task::JoinHandle<()> {
        self.start(|report| report.log())
    }

    /// Get the reporter configuration.
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }
}

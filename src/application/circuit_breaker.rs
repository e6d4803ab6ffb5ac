//! Circuit breaker for calls to external dependencies.
//!
//! One breaker guards one named dependency (database, payment provider, email
//! service, third-party API) and is shared by every in-flight caller.
//!
//! ```text
//! CLOSED --(failure_threshold failures)--> OPEN
//! OPEN   --(next call after reset_timeout)--> HALF_OPEN
//! HALF_OPEN --(success_threshold successes)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! ```
//!
//! The OPEN to HALF_OPEN transition happens lazily on the next call; there is no
//! background timer. State is process-local and lives in atomics so transitions
//! are safe under concurrent callers.

use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::domain::error::{BreakerError, ConfigError};
use crate::domain::policy::duration_to_ms;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through and failures are counted
    Closed = 0,
    /// Calls are rejected without being attempted
    Open = 1,
    /// Trial calls pass through to test recovery
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Dependencies with built-in breaker presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Database,
    Payment,
    Email,
    ExternalApi,
}

impl Dependency {
    pub const ALL: [Dependency; 4] = [
        Dependency::Database,
        Dependency::Payment,
        Dependency::Email,
        Dependency::ExternalApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Database => "database",
            Dependency::Payment => "payment",
            Dependency::Email => "email",
            Dependency::ExternalApi => "external_api",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is let through
    pub reset_timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Preset thresholds for a known dependency.
    pub fn for_dependency(dependency: Dependency) -> Self {
        let (failure_threshold, reset_secs) = match dependency {
            Dependency::Database => (5, 30),
            Dependency::Payment => (3, 60),
            Dependency::Email => (5, 60),
            Dependency::ExternalApi => (10, 30),
        };
        Self {
            failure_threshold,
            reset_timeout: Duration::from_secs(reset_secs),
            success_threshold: 3,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ConfigError::ZeroBreakerThreshold(name.to_string()));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    /// Epoch milliseconds of the most recent failure
    pub last_failure_ms: Option<u64>,
}

/// Circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure_ms: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Option<Metrics>,
}

/// Shareable circuit breaker reference.
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

impl CircuitBreaker {
    /// Create a closed breaker for `name`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            config,
            clock,
            metrics: None,
        }
    }

    /// Count short-circuited calls in `metrics`.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Acquire)
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check whether a call may proceed, moving OPEN to HALF_OPEN once the
    /// reset timeout has elapsed since the last failure.
    ///
    /// HALF_OPEN admits every concurrent caller rather than a single trial call,
    /// and a success reported by a call that started before the transition
    /// counts toward closing. Any failure reopens the circuit.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .clock
                    .now_ms()
                    .saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
                if elapsed < duration_to_ms(self.config.reset_timeout) {
                    return false;
                }

                // Only one caller performs the transition; the rest see HalfOpen
                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    self.success_count.store(0, Ordering::Release);
                    info!(dependency = %self.name, "circuit half-open, allowing trial calls");
                    true
                } else {
                    self.state() == CircuitState::HalfOpen
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= u64::from(self.config.success_threshold)
                    && self.transition(CircuitState::HalfOpen, CircuitState::Closed)
                {
                    self.failure_count.store(0, Ordering::Release);
                    self.success_count.store(0, Ordering::Release);
                    info!(dependency = %self.name, "circuit closed, dependency recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_ms
            .store(self.clock.now_ms(), Ordering::Release);

        match self.state() {
            CircuitState::Closed => {
                if failures >= u64::from(self.config.failure_threshold)
                    && self.transition(CircuitState::Closed, CircuitState::Open)
                {
                    warn!(
                        dependency = %self.name,
                        failures,
                        reset_timeout_ms = duration_to_ms(self.config.reset_timeout),
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
                    self.success_count.store(0, Ordering::Release);
                    warn!(dependency = %self.name, "trial call failed, circuit reopened");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// When the circuit is open the operation is not invoked and
    /// `BreakerError::Open` is returned. Otherwise the outcome is recorded and
    /// the operation's own error is returned unchanged in `BreakerError::Inner`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            debug!(dependency = %self.name, "circuit open, call rejected");
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_rejection();
            }
            return Err(BreakerError::Open {
                dependency: self.name.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(BreakerError::Inner(error))
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let last_failure = self.last_failure_ms.load(Ordering::Acquire);
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count(),
            success_count: self.success_count(),
            last_failure_ms: (last_failure > 0).then_some(last_failure),
        }
    }

    /// Operator action: force the circuit closed and clear its counters.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        info!(dependency = %self.name, "circuit reset by operator");
    }
}

//! # admission-guard
//!
//! Admission control for request-serving backends: adaptive tier-aware rate
//! limiting, behavior-based abuse scoring, failure-driven blacklisting and
//! circuit breakers for outbound dependencies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use admission_guard::{AdmissionDecision, AdmissionGuard, Identity, RequestContext, Tier};
//!
//! # async fn handle() {
//! // Defaults: in-memory stores, basic/premium/enterprise tiers, fail-open
//! let guard = AdmissionGuard::builder().build().unwrap();
//!
//! let identity = Identity::new().with_ip("203.0.113.7").with_user("alice");
//! let ctx = RequestContext::new(identity.clone(), Tier::Basic, "GET", "/products")
//!     .with_query("q", "shoes");
//!
//! match guard.admit(&ctx).await {
//!     AdmissionDecision::Admitted(admission) => {
//!         println!("{} requests left", admission.remaining);
//!         // ... run the handler, then report the outcome
//!         guard.record_success(&identity).await.ok();
//!     }
//!     AdmissionDecision::Denied(rejection) => {
//!         // 429 with Retry-After, or 403 for blacklisted callers
//!         println!("denied: retry after {:?}s", rejection.retry_after_secs());
//!     }
//! }
//! # }
//! ```
//!
//! ## Pipeline
//!
//! Every request passes the same stages, in order:
//!
//! 1. **Blacklist**: any active entry for the caller's IP or user agent denies
//!    the request before quota is touched
//! 2. **Key resolution**: user id, then API client id, then IP
//! 3. **Behavior**: the request is recorded and the key's trailing history is
//!    scored for endpoint scanning and injection attempts
//! 4. **Adaptive policy**: the tier's baseline is reduced by the suspicion
//!    bracket and, during peak hours, by the peak factor
//! 5. **Quota gates**: the general policy, plus an endpoint-class policy when
//!    one is configured for the request
//!
//! After the handler, [`AdmissionGuard::record_failure`] counts failures per
//! source address; once the failure budget is spent the address is
//! blacklisted for a bounded time.
//!
//! ## Failure Modes
//!
//! Store faults never surface as errors per request. The rate limiter and the
//! blacklist each have an independent [`FailureMode`]: fail-open admits the
//! request, fail-closed denies it. Both default to open. Every degraded
//! decision is logged and counted in [`Metrics`].
//!
//! ```rust,no_run
//! # use admission_guard::{AdmissionGuard, FailureMode};
//! # use std::time::Duration;
//! let guard = AdmissionGuard::builder()
//!     .with_limiter_failure_mode(FailureMode::Closed)
//!     .with_blacklist_failure_mode(FailureMode::Open)
//!     .with_store_timeout(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Circuit Breakers
//!
//! Outbound calls go through shared per-dependency breakers. Presets exist for
//! `database`, `payment`, `email` and `external_api`; other names are created
//! on first use.
//!
//! ```rust,no_run
//! # use admission_guard::{AdmissionGuard, BreakerError};
//! # async fn charge() -> Result<(), std::io::Error> { Ok(()) }
//! # async fn run() {
//! # let guard = AdmissionGuard::builder().build().unwrap();
//! match guard.breaker("payment").execute(charge).await {
//!     Ok(()) => {}
//!     Err(BreakerError::Open { dependency }) => println!("{} unavailable", dependency),
//!     Err(BreakerError::Inner(e)) => println!("payment failed: {}", e),
//! }
//! # }
//! ```
//!
//! ## Configuration
//!
//! The builder validates everything at `build()`. The same settings can be
//! deserialized into [`AdmissionConfig`] and loaded with
//! [`AdmissionGuardBuilder::from_config`].
//!
//! ## Observability
//!
//! Decisions are logged through `tracing` with structured fields; the library
//! never installs a subscriber. [`AbuseReporter`] emits periodic reports with
//! counters, breaker states and the keys rejected most often.
//!
//! ## Distributed Deployments
//!
//! With the `redis-storage` feature, `RedisQuotaStore` and `RedisBlacklist`
//! share quotas, history and the blacklist across processes.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    behavior::{BehaviorSample, SuspicionPattern, SuspicionScore},
    blacklist::{BlacklistEntry, BlacklistType},
    error::{AdmissionError, BreakerError, ConfigError, StoreError},
    key::{Identity, KeyScheme, RateLimitKey},
    policy::{FailureMode, Policy, PolicyError, Tier, TierPolicies},
    quota::{ConsumeOutcome, QuotaRecord},
};

pub use application::{
    adaptive::{AdaptiveConfig, AdaptiveController, AdaptiveDecision, PeakWindow},
    behavior::{BehaviorAnalyzer, BehaviorConfig},
    blacklist::{Blacklist, Escalation},
    circuit_breaker::{
        BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, Dependency,
        SharedCircuitBreaker,
    },
    failure_tracker::{FailureOutcome, FailureTracker},
    guard::{Admission, AdmissionDecision, AdmissionGuard, Rejection, RequestContext},
    limiter::{LimitDecision, RateLimiter},
    metrics::{Metrics, MetricsSnapshot},
    ports::{BlacklistRepository, Clock, QuotaStore, StoreHealth},
    registry::BreakerRegistry,
    reporter::{AbuseReporter, AdmissionReport, ReporterConfig},
};

pub use infrastructure::{
    builder::AdmissionGuardBuilder,
    clock::{ClockZone, SystemClock},
    config::{AdmissionConfig, BreakerConfig, PeakWindowConfig, PolicyConfig},
    memory_blacklist::MemoryBlacklist,
    memory_store::MemoryQuotaStore,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisBlacklist, RedisQuotaStore, RedisStoreConfig};

//! Composition root for the admission stack.
//!
//! [`AdmissionGuardBuilder`] wires stores, the clock, metrics and every
//! component into one [`AdmissionGuard`]. All validation happens in
//! [`build`](AdmissionGuardBuilder::build); a guard that builds never fails
//! per request because of configuration.

use crate::application::adaptive::{AdaptiveConfig, AdaptiveController, PeakWindow};
use crate::application::behavior::{BehaviorAnalyzer, BehaviorConfig};
use crate::application::blacklist::Blacklist;
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::failure_tracker::{
    default_failure_policy, FailureTracker, DEFAULT_ESCALATION_TTL,
};
use crate::application::guard::AdmissionGuard;
use crate::application::limiter::{RateLimiter, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
use crate::application::metrics::{Metrics, DEFAULT_MAX_TRACKED_KEYS};
use crate::application::ports::{BlacklistRepository, Clock, QuotaStore};
use crate::application::registry::BreakerRegistry;
use crate::application::reporter::ReporterConfig;
use crate::domain::error::ConfigError;
use crate::domain::policy::{FailureMode, Policy, Tier};
use crate::infrastructure::clock::{ClockZone, SystemClock};
use crate::infrastructure::memory_blacklist::MemoryBlacklist;
use crate::infrastructure::memory_store::MemoryQuotaStore;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for configuring an [`AdmissionGuard`].
#[derive(Debug)]
pub struct AdmissionGuardBuilder {
    clock: Option<Arc<dyn Clock>>,
    clock_zone: ClockZone,
    quota_store: Option<Arc<dyn QuotaStore>>,
    blacklist_repository: Option<Arc<dyn BlacklistRepository>>,
    adaptive: AdaptiveConfig,
    behavior: BehaviorConfig,
    endpoint_policies: AHashMap<String, Policy>,
    breakers: Vec<(String, CircuitBreakerConfig)>,
    default_breaker: CircuitBreakerConfig,
    limiter_failure_mode: FailureMode,
    blacklist_failure_mode: FailureMode,
    store_timeout: Duration,
    key_prefix: String,
    failure_policy: Policy,
    escalation_ttl: Duration,
    report_interval: Duration,
    top_n: usize,
    max_tracked_keys: usize,
}

impl AdmissionGuardBuilder {
    /// Set a custom clock (mainly for testing).
    ///
    /// Overrides [`with_clock_zone`](Self::with_clock_zone).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Time zone the system clock reads peak hours in.
    ///
    /// Default: [`ClockZone::Local`]
    pub fn with_clock_zone(mut self, zone: ClockZone) -> Self {
        self.clock_zone = zone;
        self
    }

    /// Back quotas and behavior history with `store`.
    ///
    /// Default: an in-process [`MemoryQuotaStore`]
    pub fn with_quota_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.quota_store = Some(store);
        self
    }

    /// Persist blacklist entries in `repository`.
    ///
    /// Default: an in-process [`MemoryBlacklist`]
    pub fn with_blacklist_repository(mut self, repository: Arc<dyn BlacklistRepository>) -> Self {
        self.blacklist_repository = Some(repository);
        self
    }

    /// Replace the baseline policy for `tier`.
    pub fn with_tier_policy(mut self, tier: Tier, policy: Policy) -> Self {
        self.adaptive.tiers.set(tier, policy);
        self
    }

    /// Hours during which limits are reduced by the peak factor, or `None` to disable.
    ///
    /// Default: 09:00 to 18:00
    pub fn with_peak_window(mut self, window: Option<PeakWindow>) -> Self {
        self.adaptive.peak_window = window;
        self
    }

    /// Multiplier applied to limits during the peak window.
    ///
    /// The value will be validated when `build()` is called.
    pub fn with_peak_factor(mut self, factor: f64) -> Self {
        self.adaptive.peak_factor = factor;
        self
    }

    /// Block duration multiplier for highly suspicious keys.
    pub fn with_block_escalation(mut self, factor: u32) -> Self {
        self.adaptive.block_escalation = factor;
        self
    }

    /// Gate requests of endpoint class `class` with an extra policy.
    ///
    /// Empty class names are ignored.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use admission_guard::{AdmissionGuard, Policy};
    /// let guard = AdmissionGuard::builder()
    ///     .with_endpoint_policy("auth", Policy::from_secs(5, 60, 300).unwrap())
    ///     .with_endpoint_policy("checkout", Policy::from_secs(20, 60, 60).unwrap())
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn with_endpoint_policy(mut self, class: impl Into<String>, policy: Policy) -> Self {
        let class = class.into();
        if !class.is_empty() {
            self.endpoint_policies.insert(class, policy);
        }
        self
    }

    /// Register a breaker for `name`, replacing any preset of the same name.
    pub fn with_breaker(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.breakers.push((name.into(), config));
        self
    }

    /// Config for breakers created on demand for unknown dependency names.
    pub fn with_default_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.default_breaker = config;
        self
    }

    /// What the rate limiter decides when the quota store is unreachable.
    ///
    /// Default: [`FailureMode::Open`]
    pub fn with_limiter_failure_mode(mut self, mode: FailureMode) -> Self {
        self.limiter_failure_mode = mode;
        self
    }

    /// What the blacklist decides when its repository is unreachable.
    ///
    /// Default: [`FailureMode::Open`]
    pub fn with_blacklist_failure_mode(mut self, mode: FailureMode) -> Self {
        self.blacklist_failure_mode = mode;
        self
    }

    /// Upper bound on every store round trip.
    ///
    /// Default: 250ms
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Namespace prefix for quota keys in the shared store.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Samples kept per key for behavior scoring.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.behavior.history_cap = cap;
        self
    }

    /// Trailing window of history considered when scoring.
    pub fn with_history_ttl(mut self, ttl: Duration) -> Self {
        self.behavior.history_ttl = ttl;
        self
    }

    /// Failure budget that triggers blacklist escalation when exceeded.
    ///
    /// Default: 10 failures per 10 minutes
    pub fn with_failure_policy(mut self, policy: Policy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Lifetime of blacklist entries created by escalation.
    ///
    /// Default: 24 hours
    pub fn with_escalation_ttl(mut self, ttl: Duration) -> Self {
        self.escalation_ttl = ttl;
        self
    }

    /// Interval for periodic admission reports.
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Number of abusers listed in each report.
    pub fn with_report_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Maximum distinct keys ranked for the top-abuser list.
    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max;
        self
    }

    /// Build the guard.
    ///
    /// # Errors
    /// Returns `ConfigError` if any setting is invalid.
    pub fn build(self) -> Result<AdmissionGuard, ConfigError> {
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        if self.behavior.history_cap == 0 {
            return Err(ConfigError::ZeroHistoryCap);
        }
        self.adaptive.validate()?;
        self.default_breaker.validate("default")?;
        for (name, config) in &self.breakers {
            config.validate(name)?;
        }
        let reporter_config = ReporterConfig::new(self.report_interval)?.with_top_n(self.top_n);

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::with_zone(self.clock_zone)));
        let metrics = Metrics::with_max_tracked_keys(self.max_tracked_keys);
        let store = self
            .quota_store
            .unwrap_or_else(|| Arc::new(MemoryQuotaStore::new(Arc::clone(&clock))));
        let repository = self
            .blacklist_repository
            .unwrap_or_else(|| Arc::new(MemoryBlacklist::new()));

        let limiter = RateLimiter::new(Arc::clone(&store), metrics.clone())
            .with_failure_mode(self.limiter_failure_mode)
            .with_timeout(self.store_timeout)
            .with_key_prefix(self.key_prefix);
        let analyzer = BehaviorAnalyzer::new(store, Arc::clone(&clock), self.behavior)
            .with_timeout(self.store_timeout);
        let controller = AdaptiveController::new(
            limiter.clone(),
            analyzer,
            Arc::clone(&clock),
            self.adaptive,
        );

        let blacklist = Blacklist::new(repository, Arc::clone(&clock), metrics.clone())
            .with_failure_mode(self.blacklist_failure_mode)
            .with_timeout(self.store_timeout);
        let failure_tracker = FailureTracker::new(limiter, blacklist.clone(), metrics.clone())
            .with_policy(self.failure_policy)
            .with_escalation_ttl(self.escalation_ttl);

        let registry = BreakerRegistry::with_presets(Arc::clone(&clock), metrics.clone())
            .with_default_config(self.default_breaker);
        for (name, config) in &self.breakers {
            registry.register(name, *config)?;
        }

        debug!(
            endpoint_classes = self.endpoint_policies.len(),
            breakers = registry.len(),
            "admission guard built"
        );

        Ok(AdmissionGuard::from_parts(
            blacklist,
            controller,
            failure_tracker,
            registry,
            metrics,
            clock,
            self.endpoint_policies,
            reporter_config,
        ))
    }
}

impl Default for AdmissionGuardBuilder {
    fn default() -> Self {
        Self {
            clock: None,
            clock_zone: ClockZone::default(),
            quota_store: None,
            blacklist_repository: None,
            adaptive: AdaptiveConfig::default(),
            behavior: BehaviorConfig::default(),
            endpoint_policies: AHashMap::new(),
            breakers: Vec::new(),
            default_breaker: CircuitBreakerConfig::default(),
            limiter_failure_mode: FailureMode::default(),
            blacklist_failure_mode: FailureMode::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_policy: default_failure_policy(),
            escalation_ttl: DEFAULT_ESCALATION_TTL,
            report_interval: ReporterConfig::default().interval,
            top_n: ReporterConfig::default().top_n,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
        }
    }
}

impl AdmissionGuard {
    /// Create a builder for configuring the guard.
    ///
    /// Defaults:
    /// - Tiers: basic 100/min, premium 1000/min, enterprise 5000/min, 60s block
    /// - Peak window 09:00 to 18:00 local time, peak factor 0.8
    /// - Block escalation x5 for scores above 50
    /// - Failure budget 10 per 10 minutes, 24h blacklist on escalation
    /// - Breakers for database, payment, email and external_api
    /// - In-memory stores, fail-open limiter and blacklist, 250ms store timeout
    pub fn builder() -> AdmissionGuardBuilder {
        AdmissionGuardBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::CircuitState;
    use crate::application::guard::{AdmissionDecision, Rejection, RequestContext};
    use crate::domain::key::Identity;
    use crate::infrastructure::mocks::MockClock;

    fn clock() -> Arc<MockClock> {
        let clock = MockClock::new(1_000_000);
        clock.set_hour(3);
        Arc::new(clock)
    }

    #[test]
    fn test_build_defaults() {
        let guard = AdmissionGuard::builder().build().unwrap();
        assert_eq!(guard.breakers().len(), 4);
        assert_eq!(guard.controller().limiter().failure_mode(), FailureMode::Open);
        assert_eq!(guard.blacklist().failure_mode(), FailureMode::Open);
        assert_eq!(guard.failure_tracker().policy().points(), 10);
        assert!(guard.endpoint_policy("auth").is_none());
    }

    #[test]
    fn test_build_rejects_invalid_settings() {
        assert_eq!(
            AdmissionGuard::builder()
                .with_store_timeout(Duration::ZERO)
                .build()
                .unwrap_err(),
            ConfigError::ZeroStoreTimeout
        );
        assert_eq!(
            AdmissionGuard::builder()
                .with_history_cap(0)
                .build()
                .unwrap_err(),
            ConfigError::ZeroHistoryCap
        );
        assert!(matches!(
            AdmissionGuard::builder().with_peak_factor(1.5).build(),
            Err(ConfigError::InvalidFactor { name: "peak_factor", .. })
        ));
        assert_eq!(
            AdmissionGuard::builder()
                .with_report_interval(Duration::ZERO)
                .build()
                .unwrap_err(),
            ConfigError::ZeroReportInterval
        );
        let bad = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert_eq!(
            AdmissionGuard::builder()
                .with_breaker("search", bad)
                .build()
                .unwrap_err(),
            ConfigError::ZeroBreakerThreshold("search".to_string())
        );
    }

    #[test]
    fn test_custom_breaker_replaces_preset() {
        let guard = AdmissionGuard::builder()
            .with_clock(clock())
            .with_breaker(
                "payment",
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    reset_timeout: Duration::from_secs(10),
                    success_threshold: 1,
                },
            )
            .build()
            .unwrap();

        let payment = guard.breaker("payment");
        payment.record_failure();
        assert_eq!(payment.state(), CircuitState::Open);
        assert!(Arc::ptr_eq(&payment, &guard.breaker("payment")));
    }

    #[tokio::test]
    async fn test_tier_and_endpoint_policies_apply() {
        let guard = AdmissionGuard::builder()
            .with_clock(clock())
            .with_tier_policy(Tier::Basic, Policy::from_secs(2, 60, 60).unwrap())
            .with_endpoint_policy("auth", Policy::from_secs(1, 60, 60).unwrap())
            .build()
            .unwrap();
        let identity = Identity::new().with_ip("10.0.0.1");

        let login = RequestContext::new(identity.clone(), Tier::Basic, "POST", "/login")
            .with_endpoint_class("auth");
        assert!(guard.admit(&login).await.is_admitted());
        match guard.admit(&login).await {
            AdmissionDecision::Denied(Rejection::QuotaExceeded { policy, .. }) => {
                assert_eq!(policy, "auth");
            }
            other => panic!("expected auth rejection, got {:?}", other),
        }

        let browse = RequestContext::new(identity, Tier::Basic, "GET", "/products");
        match guard.admit(&browse).await {
            AdmissionDecision::Denied(Rejection::QuotaExceeded { policy, .. }) => {
                assert_eq!(policy, "general");
            }
            other => panic!("expected general rejection, got {:?}", other),
        }
    }
}

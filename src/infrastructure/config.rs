//! Deserializable configuration.
//!
//! [`AdmissionConfig`] mirrors the builder settings in plain serde types so the
//! admission stack can be configured from a file or environment-derived map.
//! Every field has a default; an empty document yields the builder defaults.
//!
//! ```
//! use admission_guard::{AdmissionConfig, AdmissionGuardBuilder};
//!
//! let config: AdmissionConfig = serde_json::from_str(r#"{
//!     "tiers": { "basic": { "points": 50, "duration_secs": 60, "block_duration_secs": 120 } },
//!     "endpoint_policies": { "auth": { "points": 5, "duration_secs": 60 } },
//!     "limiter_failure_mode": "closed",
//!     "clock_zone": "utc"
//! }"#).unwrap();
//!
//! let guard = AdmissionGuardBuilder::from_config(&config).unwrap().build().unwrap();
//! assert_eq!(guard.endpoint_policy("auth").unwrap().points(), 5);
//! ```

use crate::application::adaptive::{PeakWindow, DEFAULT_BLOCK_ESCALATION, DEFAULT_PEAK_FACTOR};
use crate::application::behavior::{DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_TTL};
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::failure_tracker::{default_failure_policy, DEFAULT_ESCALATION_TTL};
use crate::application::limiter::{DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
use crate::application::metrics::DEFAULT_MAX_TRACKED_KEYS;
use crate::application::reporter::ReporterConfig;
use crate::domain::error::ConfigError;
use crate::domain::policy::{duration_to_ms, FailureMode, Policy, Tier};
use crate::infrastructure::builder::AdmissionGuardBuilder;
use crate::infrastructure::clock::ClockZone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// A policy in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub points: u32,
    pub duration_secs: u64,
    #[serde(default)]
    pub block_duration_secs: u64,
}

impl PolicyConfig {
    /// Validate into a [`Policy`], naming the offending entry on failure.
    pub fn to_policy(&self, name: &str) -> Result<Policy, ConfigError> {
        Policy::from_secs(self.points, self.duration_secs, self.block_duration_secs)
            .map_err(|e| ConfigError::policy(name, e))
    }
}

impl From<Policy> for PolicyConfig {
    fn from(policy: Policy) -> Self {
        Self {
            points: policy.points(),
            duration_secs: policy.duration().as_secs(),
            block_duration_secs: policy.block_duration().as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakWindowConfig {
    pub start_hour: u8,
    pub end_hour: u8,
}

/// Breaker thresholds with the reset timeout in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_success_threshold() -> u32 {
    CircuitBreakerConfig::default().success_threshold
}

impl From<BreakerConfig> for CircuitBreakerConfig {
    fn from(config: BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            success_threshold: config.success_threshold,
        }
    }
}

impl From<CircuitBreakerConfig> for BreakerConfig {
    fn from(config: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_secs: config.reset_timeout.as_secs(),
            success_threshold: config.success_threshold,
        }
    }
}

/// Complete admission configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Tier overrides keyed by tier name; unlisted tiers keep their defaults
    pub tiers: BTreeMap<String, PolicyConfig>,
    /// Extra policies keyed by endpoint class
    pub endpoint_policies: BTreeMap<String, PolicyConfig>,
    /// `None` disables peak-hour reduction
    pub peak_window: Option<PeakWindowConfig>,
    pub peak_factor: f64,
    pub block_escalation: u32,
    /// Breakers keyed by dependency name, replacing presets of the same name
    pub breakers: BTreeMap<String, BreakerConfig>,
    pub default_breaker: BreakerConfig,
    pub limiter_failure_mode: FailureMode,
    pub blacklist_failure_mode: FailureMode,
    pub store_timeout_ms: u64,
    pub key_prefix: String,
    pub clock_zone: ClockZone,
    pub history_cap: usize,
    pub history_ttl_secs: u64,
    pub failure_policy: PolicyConfig,
    pub escalation_ttl_secs: u64,
    pub report_interval_secs: u64,
    pub report_top_n: usize,
    pub max_tracked_keys: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let peak = PeakWindow::default();
        let reporter = ReporterConfig::default();
        Self {
            tiers: BTreeMap::new(),
            endpoint_policies: BTreeMap::new(),
            peak_window: Some(PeakWindowConfig {
                start_hour: peak.start_hour(),
                end_hour: peak.end_hour(),
            }),
            peak_factor: DEFAULT_PEAK_FACTOR,
            block_escalation: DEFAULT_BLOCK_ESCALATION,
            breakers: BTreeMap::new(),
            default_breaker: CircuitBreakerConfig::default().into(),
            limiter_failure_mode: FailureMode::default(),
            blacklist_failure_mode: FailureMode::default(),
            store_timeout_ms: duration_to_ms(DEFAULT_STORE_TIMEOUT),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock_zone: ClockZone::default(),
            history_cap: DEFAULT_HISTORY_CAP,
            history_ttl_secs: DEFAULT_HISTORY_TTL.as_secs(),
            failure_policy: default_failure_policy().into(),
            escalation_ttl_secs: DEFAULT_ESCALATION_TTL.as_secs(),
            report_interval_secs: reporter.interval.as_secs(),
            report_top_n: reporter.top_n,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
        }
    }
}

impl AdmissionGuardBuilder {
    /// Builder preloaded with `config`.
    ///
    /// Stores and the clock are not part of the config; set them on the
    /// returned builder.
    ///
    /// # Errors
    /// Returns `ConfigError` for unknown tier names, invalid policies or an
    /// out-of-range peak window. Remaining checks happen in `build()`.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        let mut builder = AdmissionGuardBuilder::default()
            .with_peak_factor(config.peak_factor)
            .with_block_escalation(config.block_escalation)
            .with_default_breaker(config.default_breaker.into())
            .with_limiter_failure_mode(config.limiter_failure_mode)
            .with_blacklist_failure_mode(config.blacklist_failure_mode)
            .with_store_timeout(Duration::from_millis(config.store_timeout_ms))
            .with_key_prefix(config.key_prefix.clone())
            .with_clock_zone(config.clock_zone)
            .with_history_cap(config.history_cap)
            .with_history_ttl(Duration::from_secs(config.history_ttl_secs))
            .with_failure_policy(config.failure_policy.to_policy("failure_policy")?)
            .with_escalation_ttl(Duration::from_secs(config.escalation_ttl_secs))
            .with_report_interval(Duration::from_secs(config.report_interval_secs))
            .with_report_top_n(config.report_top_n)
            .with_max_tracked_keys(config.max_tracked_keys);

        let peak_window = config
            .peak_window
            .map(|w| PeakWindow::new(w.start_hour, w.end_hour))
            .transpose()?;
        builder = builder.with_peak_window(peak_window);

        for (name, policy) in &config.tiers {
            let tier = Tier::from_str(name).map_err(|e| ConfigError::policy(name.as_str(), e))?;
            builder = builder.with_tier_policy(tier, policy.to_policy(name)?);
        }
        for (class, policy) in &config.endpoint_policies {
            builder = builder.with_endpoint_policy(class.clone(), policy.to_policy(class)?);
        }
        for (name, breaker) in &config.breakers {
            builder = builder.with_breaker(name.clone(), (*breaker).into());
        }

        Ok(builder)
    }
}

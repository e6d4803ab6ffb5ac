//! Error taxonomy.
//!
//! Per-request outcomes (quota exceeded, blacklisted, circuit open) are returned
//! as values by the components that produce them. The types here carry those
//! outcomes across API boundaries and describe infrastructure and configuration
//! faults.

use crate::domain::policy::{PolicyError, Tier};
use std::fmt;
use std::time::Duration;

/// Failure talking to a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached or returned an error
    Unavailable(String),
    /// Store did not answer within the configured timeout
    Timeout(Duration),
    /// Stored data could not be decoded
    Corrupted(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Timeout(after) => write!(f, "store timed out after {:?}", after),
            StoreError::Corrupted(msg) => write!(f, "corrupted store data: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Invalid tier, policy or breaker configuration.
///
/// Raised while building the admission stack; never produced per request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A policy failed validation
    InvalidPolicy {
        /// Name of the policy being configured
        name: String,
        /// Validation failure
        source: PolicyError,
    },
    /// A tier name did not match a known tier
    UnknownTier(String),
    /// Peak window hours must be within 0..=23
    InvalidPeakWindow { start_hour: u8, end_hour: u8 },
    /// Multiplier must be in (0, 1] for load shedding or >= 1 for escalation
    InvalidFactor { name: &'static str, value: f64 },
    /// A circuit breaker threshold was zero
    ZeroBreakerThreshold(String),
    /// Store timeout must be greater than zero
    ZeroStoreTimeout,
    /// Behavior history cap must be greater than zero
    ZeroHistoryCap,
    /// Reporter interval must be greater than zero
    ZeroReportInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPolicy { name, source } => {
                write!(f, "invalid policy '{}': {}", name, source)
            }
            ConfigError::UnknownTier(name) => write!(f, "unknown tier: {}", name),
            ConfigError::InvalidPeakWindow {
                start_hour,
                end_hour,
            } => write!(
                f,
                "invalid peak window {}..{}: hours must be within 0..=23",
                start_hour, end_hour
            ),
            ConfigError::InvalidFactor { name, value } => {
                write!(f, "invalid {}: {}", name, value)
            }
            ConfigError::ZeroBreakerThreshold(name) => {
                write!(f, "circuit breaker '{}' thresholds must be greater than 0", name)
            }
            ConfigError::ZeroStoreTimeout => write!(f, "store timeout must be greater than 0"),
            ConfigError::ZeroHistoryCap => write!(f, "history cap must be greater than 0"),
            ConfigError::ZeroReportInterval => {
                write!(f, "report interval must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPolicy { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ConfigError {
    pub(crate) fn policy(name: impl Into<String>, source: PolicyError) -> Self {
        match source {
            PolicyError::UnknownTier(tier) => ConfigError::UnknownTier(tier),
            source => ConfigError::InvalidPolicy {
                name: name.into(),
                source,
            },
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
///
/// The wrapped operation's own error is returned unchanged in `Inner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked
    Open {
        /// Dependency the breaker guards
        dependency: String,
    },
    /// The operation ran and failed
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// `CircuitOpen` for a short-circuited call; `None` when the operation itself failed.
    pub fn as_admission_error(&self) -> Option<AdmissionError> {
        match self {
            BreakerError::Open { dependency } => Some(AdmissionError::CircuitOpen {
                dependency: dependency.clone(),
            }),
            BreakerError::Inner(_) => None,
        }
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { dependency } => {
                write!(f, "circuit open for dependency '{}'", dependency)
            }
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

/// Unified admission failure, for callers that prefer `?` over matching outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// Client exceeded its quota and should slow down
    QuotaExceeded {
        policy: String,
        tier: Tier,
        retry_after: Duration,
    },
    /// Dependency protection; client should fail fast or fall back
    CircuitOpen { dependency: String },
    /// Deliberate deny; carries no detail about the matching rule
    Blacklisted,
    /// Infrastructure fault under a fail-closed policy
    StoreUnavailable { retry_after: Duration },
    /// Invalid configuration detected at startup
    Configuration(ConfigError),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::QuotaExceeded {
                policy,
                tier,
                retry_after,
            } => write!(
                f,
                "quota '{}' exceeded for {} tier, retry after {}s",
                policy,
                tier,
                retry_after.as_secs()
            ),
            AdmissionError::CircuitOpen { dependency } => {
                write!(f, "circuit open for dependency '{}'", dependency)
            }
            AdmissionError::Blacklisted => write!(f, "access denied"),
            AdmissionError::StoreUnavailable { retry_after } => write!(
                f,
                "admission store unavailable, retry after {}s",
                retry_after.as_secs()
            ),
            AdmissionError::Configuration(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl std::error::Error for AdmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdmissionError::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for AdmissionError {
    fn from(e: ConfigError) -> Self {
        AdmissionError::Configuration(e)
    }
}

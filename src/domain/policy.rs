//! Quota policies and subscriber tiers.
//!
//! A [`Policy`] is the `(points, duration, block_duration)` tuple that governs one
//! limited resource class. Tiers map a subject classification to its baseline policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Error returned when a policy or tier cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Points must be greater than zero
    ZeroPoints,
    /// Window duration must be greater than zero
    ZeroDuration,
    /// Tier name is not one of basic, premium or enterprise
    UnknownTier(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroPoints => write!(f, "points must be greater than 0"),
            PolicyError::ZeroDuration => write!(f, "duration must be greater than 0"),
            PolicyError::UnknownTier(name) => write!(f, "unknown tier: {}", name),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Fixed-window quota policy.
///
/// # Example
/// ```
/// use admission_guard::Policy;
/// use std::time::Duration;
///
/// let policy = Policy::new(100, Duration::from_secs(60), Duration::from_secs(60)).unwrap();
/// assert_eq!(policy.points(), 100);
/// assert!(Policy::new(0, Duration::from_secs(60), Duration::ZERO).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Policy {
    points: u32,
    duration: Duration,
    block_duration: Duration,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// A zero `block_duration` means an exhausted key is only rejected until its
    /// window expires.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroPoints` or `PolicyError::ZeroDuration`.
    pub fn new(
        points: u32,
        duration: Duration,
        block_duration: Duration,
    ) -> Result<Self, PolicyError> {
        if points == 0 {
            return Err(PolicyError::ZeroPoints);
        }
        if duration.is_zero() {
            return Err(PolicyError::ZeroDuration);
        }
        Ok(Self {
            points,
            duration,
            block_duration,
        })
    }

    /// Built-in presets; `points` and `duration_secs` must be non-zero.
    pub(crate) const fn preset(points: u32, duration_secs: u64, block_duration_secs: u64) -> Self {
        Self {
            points,
            duration: Duration::from_secs(duration_secs),
            block_duration: Duration::from_secs(block_duration_secs),
        }
    }

    /// Convenience constructor taking whole seconds.
    pub fn from_secs(
        points: u32,
        duration_secs: u64,
        block_duration_secs: u64,
    ) -> Result<Self, PolicyError> {
        Self::new(
            points,
            Duration::from_secs(duration_secs),
            Duration::from_secs(block_duration_secs),
        )
    }

    /// Maximum consumptions allowed within one window.
    pub fn points(&self) -> u32 {
        self.points
    }

    /// Length of the fixed window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// How long a key stays blocked after exceeding its points.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    pub(crate) fn duration_ms(&self) -> u64 {
        duration_to_ms(self.duration)
    }

    pub(crate) fn block_duration_ms(&self) -> u64 {
        duration_to_ms(self.block_duration)
    }

    /// Copy of this policy with a different point budget (clamped to at least 1).
    pub fn with_points(self, points: u32) -> Self {
        Self {
            points: points.max(1),
            ..self
        }
    }

    /// Copy of this policy with a different block duration.
    pub fn with_block_duration(self, block_duration: Duration) -> Self {
        Self {
            block_duration,
            ..self
        }
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

/// Subscriber tier setting baseline quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::Basic, Tier::Premium, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(PolicyError::UnknownTier(s.to_string())),
        }
    }
}

/// Baseline policy per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicies {
    basic: Policy,
    premium: Policy,
    enterprise: Policy,
}

impl TierPolicies {
    pub fn new(basic: Policy, premium: Policy, enterprise: Policy) -> Self {
        Self {
            basic,
            premium,
            enterprise,
        }
    }

    /// Baseline policy for a tier.
    pub fn get(&self, tier: Tier) -> &Policy {
        match tier {
            Tier::Basic => &self.basic,
            Tier::Premium => &self.premium,
            Tier::Enterprise => &self.enterprise,
        }
    }

    /// Replace the baseline policy for a tier.
    pub fn set(&mut self, tier: Tier, policy: Policy) {
        match tier {
            Tier::Basic => self.basic = policy,
            Tier::Premium => self.premium = policy,
            Tier::Enterprise => self.enterprise = policy,
        }
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            basic: Policy::preset(100, 60, 60),
            premium: Policy::preset(1_000, 60, 60),
            enterprise: Policy::preset(5_000, 60, 60),
        }
    }
}

/// What a component does when its backing store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Allow the request through
    #[default]
    Open,
    /// Deny the request
    Closed,
}

impl FailureMode {
    pub fn allows(&self) -> bool {
        matches!(self, FailureMode::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_validation() {
        assert_eq!(
            Policy::from_secs(0, 60, 0).unwrap_err(),
            PolicyError::ZeroPoints
        );
        assert_eq!(
            Policy::from_secs(10, 0, 0).unwrap_err(),
            PolicyError::ZeroDuration
        );

        let policy = Policy::from_secs(10, 600, 3600).unwrap();
        assert_eq!(policy.points(), 10);
        assert_eq!(policy.duration(), Duration::from_secs(600));
        assert_eq!(policy.block_duration(), Duration::from_secs(3600));
        assert_eq!(policy.duration_ms(), 600_000);
    }

    #[test]
    fn test_zero_block_duration_is_valid() {
        let policy = Policy::from_secs(5, 1, 0).unwrap();
        assert_eq!(policy.block_duration_ms(), 0);
    }

    #[test]
    fn test_with_points_clamps_to_one() {
        let policy = Policy::from_secs(100, 60, 60).unwrap();
        assert_eq!(policy.with_points(0).points(), 1);
        assert_eq!(policy.with_points(42).points(), 42);
        assert_eq!(policy.with_points(42).duration(), policy.duration());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("basic".parse::<Tier>().unwrap(), Tier::Basic);
        assert_eq!(" Premium ".parse::<Tier>().unwrap(), Tier::Premium);
        assert_eq!("ENTERPRISE".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert_eq!(
            "gold".parse::<Tier>().unwrap_err(),
            PolicyError::UnknownTier("gold".to_string())
        );
    }

    #[test]
    fn test_default_tier_policies() {
        let tiers = TierPolicies::default();
        assert_eq!(tiers.get(Tier::Basic).points(), 100);
        assert_eq!(tiers.get(Tier::Basic).duration(), Duration::from_secs(60));
        assert!(tiers.get(Tier::Premium).points() > tiers.get(Tier::Basic).points());
        assert!(tiers.get(Tier::Enterprise).points() > tiers.get(Tier::Premium).points());
    }

    #[test]
    fn test_set_tier_policy() {
        let mut tiers = TierPolicies::default();
        let custom = Policy::from_secs(7, 10, 0).unwrap();
        tiers.set(Tier::Premium, custom);
        assert_eq!(tiers.get(Tier::Premium), &custom);
    }

    #[test]
    fn test_failure_mode_default_is_open() {
        assert_eq!(FailureMode::default(), FailureMode::Open);
        assert!(FailureMode::Open.allows());
        assert!(!FailureMode::Closed.allows());
    }
}

//! Adaptive policy selection.
//!
//! The effective policy for a request starts from its tier's baseline and is
//! tightened by the key's suspicion score and by peak-hour load shedding:
//!
//! | Score      | Factor |
//! |------------|--------|
//! | > 80       | 0.1    |
//! | > 50       | 0.3    |
//! | > 20       | 0.7    |
//! | otherwise  | 1.0    |
//!
//! Only the highest matching bracket applies. During the peak window the
//! factor is further multiplied by the peak factor. Scores above 50 also
//! multiply the block duration.

use crate::application::behavior::BehaviorAnalyzer;
use crate::application::limiter::{LimitDecision, RateLimiter};
use crate::application::ports::Clock;
use crate::domain::behavior::SuspicionScore;
use crate::domain::error::ConfigError;
use crate::domain::key::RateLimitKey;
use crate::domain::policy::{Policy, Tier, TierPolicies};
use std::sync::Arc;

/// Policy name tier quotas are consumed under.
pub const GENERAL_POLICY: &str = "general";
pub const DEFAULT_PEAK_FACTOR: f64 = 0.8;
pub const DEFAULT_BLOCK_ESCALATION: u32 = 5;
/// Score above which the block duration escalates.
pub const ESCALATION_SCORE: u32 = 50;

const PERMILLE: u64 = 1_000;

/// Hours of the day, `[start_hour, end_hour)`, during which load shedding applies.
///
/// A window whose end is before its start wraps past midnight; equal hours
/// describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindow {
    start_hour: u8,
    end_hour: u8,
}

impl PeakWindow {
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self, ConfigError> {
        if start_hour > 23 || end_hour > 23 {
            return Err(ConfigError::InvalidPeakWindow {
                start_hour,
                end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u8 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u8 {
        self.end_hour
    }

    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl Default for PeakWindow {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
        }
    }
}

/// Score bracket multiplier for a suspicion score.
pub fn adjustment_factor(score: u32) -> f64 {
    bracket_permille(score) as f64 / PERMILLE as f64
}

fn bracket_permille(score: u32) -> u64 {
    if score > 80 {
        100
    } else if score > 50 {
        300
    } else if score > 20 {
        700
    } else {
        PERMILLE
    }
}

/// Tier table plus the load and abuse adjustments applied on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub tiers: TierPolicies,
    pub peak_window: Option<PeakWindow>,
    /// Multiplier applied during the peak window, in (0, 1]
    pub peak_factor: f64,
    /// Block duration multiplier for scores above 50, at least 1
    pub block_escalation: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            tiers: TierPolicies::default(),
            peak_window: Some(PeakWindow::default()),
            peak_factor: DEFAULT_PEAK_FACTOR,
            block_escalation: DEFAULT_BLOCK_ESCALATION,
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.peak_factor > 0.0 && self.peak_factor <= 1.0) {
            return Err(ConfigError::InvalidFactor {
                name: "peak_factor",
                value: self.peak_factor,
            });
        }
        if self.block_escalation == 0 {
            return Err(ConfigError::InvalidFactor {
                name: "block_escalation",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Effective policy for `(tier, score, hour)`.
    ///
    /// Deterministic: identical inputs always yield the identical policy.
    ///
    /// # Example
    /// ```
    /// use admission_guard::{AdaptiveConfig, Tier};
    ///
    /// let config = AdaptiveConfig { peak_window: None, ..AdaptiveConfig::default() };
    /// assert_eq!(config.effective_policy(Tier::Basic, 0, 12).points(), 100);
    /// assert_eq!(config.effective_policy(Tier::Basic, 60, 12).points(), 30);
    /// ```
    pub fn effective_policy(&self, tier: Tier, score: u32, hour: u8) -> Policy {
        let base = *self.tiers.get(tier);

        // Work in permille so bracket and peak products stay exact
        let mut factor = bracket_permille(score);
        if self.peak_window.is_some_and(|w| w.contains(hour)) {
            let peak = (self.peak_factor * PERMILLE as f64).round() as u64;
            factor = factor * peak / PERMILLE;
        }
        let points = u64::from(base.points()) * factor / PERMILLE;
        let points = u32::try_from(points).unwrap_or(u32::MAX).max(1);

        let mut policy = base.with_points(points);
        if score > ESCALATION_SCORE {
            let block = base
                .block_duration()
                .checked_mul(self.block_escalation)
                .unwrap_or(std::time::Duration::MAX);
            policy = policy.with_block_duration(block);
        }
        policy
    }
}

/// Result of an adaptive consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveDecision {
    pub decision: LimitDecision,
    /// Policy the request was evaluated against
    pub policy: Policy,
    pub score: SuspicionScore,
}

/// Resolves a key's effective policy and consumes it.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    limiter: RateLimiter,
    analyzer: BehaviorAnalyzer,
    clock: Arc<dyn Clock>,
    config: AdaptiveConfig,
}

impl AdaptiveController {
    pub fn new(
        limiter: RateLimiter,
        analyzer: BehaviorAnalyzer,
        clock: Arc<dyn Clock>,
        config: AdaptiveConfig,
    ) -> Self {
        Self {
            limiter,
            analyzer,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn analyzer(&self) -> &BehaviorAnalyzer {
        &self.analyzer
    }

    /// Effective policy for `key` under `tier` right now, with the score it was derived from.
    pub async fn compute_effective_policy(
        &self,
        key: &RateLimitKey,
        tier: Tier,
    ) -> (Policy, SuspicionScore) {
        let score = self.analyzer.score(key).await;
        let policy = self
            .config
            .effective_policy(tier, score.score, self.clock.hour());
        (policy, score)
    }

    /// Consume the general policy for `key` at its effective limit.
    pub async fn consume(&self, key: &RateLimitKey, tier: Tier) -> AdaptiveDecision {
        let (policy, score) = self.compute_effective_policy(key, tier).await;
        let decision = self.limiter.consume(GENERAL_POLICY, key, &policy).await;
        AdaptiveDecision {
            decision,
            policy,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::behavior::BehaviorConfig;
    use crate::application::metrics::Metrics;
    use crate::domain::behavior::BehaviorSample;
    use crate::infrastructure::memory_store::MemoryQuotaStore;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    fn off_peak() -> AdaptiveConfig {
        AdaptiveConfig {
            peak_window: None,
            ..AdaptiveConfig::default()
        }
    }

    #[test]
    fn test_brackets_are_non_cumulative() {
        let config = off_peak();
        let points = |score| config.effective_policy(Tier::Basic, score, 0).points();

        assert_eq!(points(0), 100);
        assert_eq!(points(20), 100);
        assert_eq!(points(21), 70);
        assert_eq!(points(50), 70);
        assert_eq!(points(51), 30);
        assert_eq!(points(80), 30);
        assert_eq!(points(81), 10);
        assert_eq!(points(500), 10);
    }

    #[test]
    fn test_adjustment_factor() {
        assert_eq!(adjustment_factor(0), 1.0);
        assert_eq!(adjustment_factor(30), 0.7);
        assert_eq!(adjustment_factor(60), 0.3);
        assert_eq!(adjustment_factor(90), 0.1);
    }

    #[test]
    fn test_peak_hours_shed_load() {
        let config = AdaptiveConfig {
            peak_window: Some(PeakWindow::new(9, 18).unwrap()),
            ..AdaptiveConfig::default()
        };
        assert_eq!(config.effective_policy(Tier::Basic, 0, 12).points(), 80);
        assert_eq!(config.effective_policy(Tier::Basic, 0, 18).points(), 100);
        assert_eq!(config.effective_policy(Tier::Premium, 30, 9).points(), 560);
    }

    #[test]
    fn test_effective_points_never_below_one() {
        let mut config = off_peak();
        config
            .tiers
            .set(Tier::Basic, Policy::from_secs(5, 60, 60).unwrap());
        assert_eq!(config.effective_policy(Tier::Basic, 100, 0).points(), 1);
    }

    #[test]
    fn test_block_escalates_above_fifty() {
        let config = off_peak();
        let calm = config.effective_policy(Tier::Basic, 50, 0);
        assert_eq!(calm.block_duration(), Duration::from_secs(60));

        let hostile = config.effective_policy(Tier::Basic, 51, 0);
        assert_eq!(hostile.block_duration(), Duration::from_secs(300));
        assert_eq!(hostile.duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_effective_policy_is_deterministic() {
        let config = AdaptiveConfig::default();
        for tier in Tier::ALL {
            for score in [0, 25, 55, 85] {
                for hour in 0..24 {
                    assert_eq!(
                        config.effective_policy(tier, score, hour),
                        config.effective_policy(tier, score, hour)
                    );
                }
            }
        }
    }

    #[test]
    fn test_peak_window_wraps_midnight() {
        let window = PeakWindow::new(22, 2).unwrap();
        assert!(window.contains(23));
        assert!(window.contains(0));
        assert!(window.contains(1));
        assert!(!window.contains(2));
        assert!(!window.contains(12));

        assert!(!PeakWindow::new(5, 5).unwrap().contains(5));
        assert!(PeakWindow::new(24, 2).is_err());
    }

    #[test]
    fn test_validate_factors() {
        assert!(AdaptiveConfig::default().validate().is_ok());

        let bad_peak = AdaptiveConfig {
            peak_factor: 1.5,
            ..AdaptiveConfig::default()
        };
        assert!(matches!(
            bad_peak.validate(),
            Err(ConfigError::InvalidFactor { name: "peak_factor", .. })
        ));

        let bad_escalation = AdaptiveConfig {
            block_escalation: 0,
            ..AdaptiveConfig::default()
        };
        assert!(bad_escalation.validate().is_err());
    }

    #[tokio::test]
    async fn test_controller_tightens_suspicious_keys() {
        let clock = MockClock::new(50_000_000);
        clock.set_hour(3);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryQuotaStore::new(Arc::clone(&shared)));
        let limiter = RateLimiter::new(store.clone(), Metrics::new());
        let analyzer =
            BehaviorAnalyzer::new(store, Arc::clone(&shared), BehaviorConfig::default());
        let controller = AdaptiveController::new(limiter, analyzer, shared, off_peak());

        let key = RateLimitKey::ip("6.6.6.6");
        let sample = BehaviorSample::new("/search", "GET", clock.now_ms())
            .with_query("q", "1 UNION SELECT password");
        controller
            .analyzer()
            .record_sample(&key, &sample)
            .await
            .unwrap();

        let first = controller.consume(&key, Tier::Basic).await;
        assert_eq!(first.policy.points(), 70);
        assert_eq!(first.score.score, 50);
        assert_eq!(first.decision.outcome.remaining_points(), 69);

        let clean = controller
            .consume(&RateLimitKey::ip("1.1.1.1"), Tier::Basic)
            .await;
        assert_eq!(clean.policy.points(), 100);
    }
}

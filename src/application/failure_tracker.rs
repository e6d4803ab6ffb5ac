//! Consecutive-failure tracking with blacklist escalation.
//!
//! Each failed request consumes one point from a dedicated failure policy.
//! When that policy rejects, the key's identity is blacklisted for a bounded
//! time. A success clears the key's counter.

use crate::application::blacklist::{Blacklist, Escalation};
use crate::application::limiter::RateLimiter;
use crate::application::metrics::Metrics;
use crate::domain::blacklist::{BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use crate::domain::key::RateLimitKey;
use crate::domain::policy::Policy;
use std::time::Duration;
use tracing::warn;

/// Policy name failures are counted under.
pub const FAILURE_POLICY: &str = "failures";
/// Default blacklist lifetime for escalated keys.
pub const DEFAULT_ESCALATION_TTL: Duration = Duration::from_secs(24 * 3_600);

/// Failure budget of 10 per 10 minutes, blocking for an hour once exceeded.
pub fn default_failure_policy() -> Policy {
    Policy::preset(10, 600, 3_600)
}

/// Result of recording one failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counted; `remaining` failures are tolerated before escalation
    Recorded { remaining: u32 },
    /// Threshold crossed; carries the entry now denying the key, which may
    /// predate this failure
    Escalated(BlacklistEntry),
    /// Threshold crossed but the key has no blacklistable identity
    ThresholdExceeded,
    /// The failure could not be counted or the escalation could not be stored
    Unavailable,
}

/// Counts failures per key and escalates sustained abuse to the blacklist.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    limiter: RateLimiter,
    blacklist: Blacklist,
    metrics: Metrics,
    policy: Policy,
    escalation_ttl: Duration,
}

impl FailureTracker {
    pub fn new(limiter: RateLimiter, blacklist: Blacklist, metrics: Metrics) -> Self {
        Self {
            limiter,
            blacklist,
            metrics,
            policy: default_failure_policy(),
            escalation_ttl: DEFAULT_ESCALATION_TTL,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_escalation_ttl(mut self, ttl: Duration) -> Self {
        self.escalation_ttl = ttl;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Record one failed request for `key`, escalating when the budget is spent.
    pub async fn record_failed_request(&self, key: &RateLimitKey) -> FailureOutcome {
        let decision = self.limiter.consume(FAILURE_POLICY, key, &self.policy).await;
        if decision.degraded {
            return FailureOutcome::Unavailable;
        }
        if decision.is_allowed() {
            return FailureOutcome::Recorded {
                remaining: decision.outcome.remaining_points(),
            };
        }

        let Some(entry_type) = BlacklistType::for_key(key) else {
            warn!(key = %key, "failure threshold exceeded for key without blacklistable identity");
            return FailureOutcome::ThresholdExceeded;
        };

        let reason = format!(
            "{} failed requests within {}s",
            self.policy.points(),
            self.policy.duration().as_secs()
        );
        match self
            .blacklist
            .escalate(entry_type, key.id(), &reason, self.escalation_ttl)
            .await
        {
            Ok(Escalation::Listed(entry)) => {
                self.metrics.record_escalation(&key.to_string());
                warn!(
                    key = %key,
                    ttl_secs = self.escalation_ttl.as_secs(),
                    "failure threshold exceeded, key blacklisted"
                );
                FailureOutcome::Escalated(entry)
            }
            Ok(Escalation::AlreadyListed(entry)) => FailureOutcome::Escalated(entry),
            Err(error) => {
                warn!(key = %key, error = %error, "failed to store blacklist escalation");
                FailureOutcome::Unavailable
            }
        }
    }

    /// Clear the failure counter for `key`.
    pub async fn record_success(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        self.limiter.reset(FAILURE_POLICY, key).await
    }
}

//! Rate limiter coordination logic.
//!
//! The rate limiter is policy-agnostic: callers pass a policy name and a
//! [`Policy`] and it consumes one point from the shared [`QuotaStore`]. Store
//! faults are absorbed according to the limiter's [`FailureMode`] and flagged
//! as degraded on the returned decision.

use crate::application::metrics::Metrics;
use crate::application::ports::{with_timeout, QuotaStore};
use crate::domain::error::StoreError;
use crate::domain::key::RateLimitKey;
use crate::domain::policy::{FailureMode, Policy};
use crate::domain::quota::{ConsumeOutcome, QuotaRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default store key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "rl:";
/// Default bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of consuming one named policy for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDecision {
    /// Name of the policy that was consumed
    pub policy: String,
    pub outcome: ConsumeOutcome,
    /// The store was unreachable and the outcome came from the failure mode
    pub degraded: bool,
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome.is_allowed()
    }

    pub fn is_rejected(&self) -> bool {
        self.outcome.is_rejected()
    }
}

/// Coordinates quota consumption against the shared store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    metrics: Metrics,
    failure_mode: FailureMode,
    timeout: Duration,
    key_prefix: String,
}

impl RateLimiter {
    /// Create a limiter that fails open with the default timeout and prefix.
    pub fn new(store: Arc<dyn QuotaStore>, metrics: Metrics) -> Self {
        Self {
            store,
            metrics,
            failure_mode: FailureMode::Open,
            timeout: DEFAULT_STORE_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Store key for `(policy_name, key)`.
    pub fn store_key(&self, policy_name: &str, key: &RateLimitKey) -> String {
        format!("{}{}:{}", self.key_prefix, policy_name, key)
    }

    /// Consume one point of `policy` for `key`.
    ///
    /// # Fail-Safe Behavior
    /// If the store errors or times out, a fail-open limiter reports the full
    /// budget as remaining and a fail-closed limiter rejects with a retry of
    /// one window. Either way the decision is marked `degraded`.
    pub async fn consume(
        &self,
        policy_name: &str,
        key: &RateLimitKey,
        policy: &Policy,
    ) -> LimitDecision {
        let store_key = self.store_key(policy_name, key);
        match with_timeout(self.timeout, self.store.consume(&store_key, policy)).await {
            Ok(outcome) => {
                if let ConsumeOutcome::Rejected { retry_after_ms } = outcome {
                    debug!(
                        policy = policy_name,
                        key = %key,
                        retry_after_ms,
                        "quota exhausted"
                    );
                }
                LimitDecision {
                    policy: policy_name.to_string(),
                    outcome,
                    degraded: false,
                }
            }
            Err(error) => self.degrade(policy_name, key, policy, &error),
        }
    }

    /// Consume each gate in order, stopping at the first rejection.
    ///
    /// Returns the decisions made; when a gate rejects, it is the last element
    /// and later gates are left untouched.
    pub async fn consume_all(
        &self,
        key: &RateLimitKey,
        gates: &[(&str, Policy)],
    ) -> Vec<LimitDecision> {
        let mut decisions = Vec::with_capacity(gates.len());
        for (name, policy) in gates {
            let decision = self.consume(name, key, policy).await;
            let rejected = decision.is_rejected();
            decisions.push(decision);
            if rejected {
                break;
            }
        }
        decisions
    }

    /// Current record for `(policy_name, key)`, without consuming.
    pub async fn get(
        &self,
        policy_name: &str,
        key: &RateLimitKey,
    ) -> Result<Option<QuotaRecord>, StoreError> {
        let store_key = self.store_key(policy_name, key);
        with_timeout(self.timeout, self.store.get(&store_key)).await
    }

    /// Forget all consumption for `(policy_name, key)`.
    pub async fn reset(&self, policy_name: &str, key: &RateLimitKey) -> Result<(), StoreError> {
        let store_key = self.store_key(policy_name, key);
        with_timeout(self.timeout, self.store.reset(&store_key)).await
    }

    fn degrade(
        &self,
        policy_name: &str,
        key: &RateLimitKey,
        policy: &Policy,
        error: &StoreError,
    ) -> LimitDecision {
        self.metrics.record_degraded();
        let outcome = match self.failure_mode {
            FailureMode::Open => {
                warn!(policy = policy_name, key = %key, error = %error, "quota store unavailable, failing open");
                ConsumeOutcome::Consumed {
                    remaining: policy.points(),
                    ms_before_next: policy.duration_ms(),
                }
            }
            FailureMode::Closed => {
                warn!(policy = policy_name, key = %key, error = %error, "quota store unavailable, failing closed");
                ConsumeOutcome::Rejected {
                    retry_after_ms: policy.duration_ms(),
                }
            }
        };
        LimitDecision {
            policy: policy_name.to_string(),
            outcome,
            degraded: true,
        }
    }
}

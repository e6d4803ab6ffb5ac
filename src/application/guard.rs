//! Request admission pipeline.
//!
//! ```text
//! request -> blacklist check -> key resolution -> behavior sample + score
//!         -> effective policy -> general gate (+ endpoint-class gate) -> handler
//! ```
//!
//! Rejections are returned as [`AdmissionDecision::Denied`] values before the
//! handler runs. After the handler, callers report the outcome with
//! [`AdmissionGuard::record_failure`] or [`AdmissionGuard::record_success`] and
//! wrap external calls in the breaker from [`AdmissionGuard::breaker`].

use crate::application::adaptive::{AdaptiveController, GENERAL_POLICY};
use crate::application::blacklist::Blacklist;
use crate::application::circuit_breaker::SharedCircuitBreaker;
use crate::application::failure_tracker::{FailureOutcome, FailureTracker};
use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::application::registry::BreakerRegistry;
use crate::application::reporter::{AbuseReporter, AdmissionReport, ReporterConfig};
use crate::domain::behavior::{BehaviorSample, SuspicionScore};
use crate::domain::error::{AdmissionError, StoreError};
use crate::domain::key::{Identity, RateLimitKey};
use crate::domain::policy::{Policy, Tier};
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the admission pipeline needs to know about one request.
///
/// Supplied by the surrounding HTTP layer; the pipeline never parses raw HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub identity: Identity,
    pub tier: Tier,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Named endpoint class (e.g. `auth`, `checkout`) with its own policy
    pub endpoint_class: Option<String>,
}

impl RequestContext {
    pub fn new(
        identity: Identity,
        tier: Tier,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            tier,
            method: method.into(),
            path: path.into(),
            query: BTreeMap::new(),
            endpoint_class: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_endpoint_class(mut self, class: impl Into<String>) -> Self {
        self.endpoint_class = Some(class.into());
        self
    }
}

/// Details of an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub key: RateLimitKey,
    /// Effective general policy the request was evaluated against
    pub policy: Policy,
    /// Points left in the general window
    pub remaining: u32,
    /// Milliseconds until the general window resets
    pub reset_after_ms: u64,
    pub score: SuspicionScore,
    /// At least one gate was decided by a failure mode instead of the store
    pub degraded: bool,
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A quota gate rejected the request
    QuotaExceeded {
        remaining: u32,
        policy: String,
        tier: Tier,
        retry_after_secs: u64,
    },
    /// Denied by the blacklist; deliberately carries no detail
    Blacklisted,
    /// A fail-closed store was unreachable
    StoreUnavailable { retry_after_secs: u64 },
}

impl Rejection {
    /// Value for a `Retry-After` header, if one applies.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Rejection::QuotaExceeded {
                retry_after_secs, ..
            }
            | Rejection::StoreUnavailable { retry_after_secs } => Some(*retry_after_secs),
            Rejection::Blacklisted => None,
        }
    }

    pub fn into_error(self) -> AdmissionError {
        match self {
            Rejection::QuotaExceeded {
                policy,
                tier,
                retry_after_secs,
                ..
            } => AdmissionError::QuotaExceeded {
                policy,
                tier,
                retry_after: Duration::from_secs(retry_after_secs),
            },
            Rejection::Blacklisted => AdmissionError::Blacklisted,
            Rejection::StoreUnavailable { retry_after_secs } => AdmissionError::StoreUnavailable {
                retry_after: Duration::from_secs(retry_after_secs),
            },
        }
    }
}

/// Outcome of [`AdmissionGuard::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted(Admission),
    Denied(Rejection),
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AdmissionDecision::Denied(rejection) => Some(rejection),
            AdmissionDecision::Admitted(_) => None,
        }
    }

    /// Convert to a `Result` for callers that prefer `?`.
    pub fn into_result(self) -> Result<Admission, AdmissionError> {
        match self {
            AdmissionDecision::Admitted(admission) => Ok(admission),
            AdmissionDecision::Denied(rejection) => Err(rejection.into_error()),
        }
    }
}

fn ms_to_retry_secs(ms: u64) -> u64 {
    ms.div_ceil(1_000).max(1)
}

/// Composition of every admission component for one process.
///
/// Build with [`AdmissionGuard::builder`]. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    blacklist: Blacklist,
    controller: AdaptiveController,
    failure_tracker: FailureTracker,
    registry: BreakerRegistry,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    endpoint_policies: Arc<AHashMap<String, Policy>>,
    reporter_config: ReporterConfig,
}

impl AdmissionGuard {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        blacklist: Blacklist,
        controller: AdaptiveController,
        failure_tracker: FailureTracker,
        registry: BreakerRegistry,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
        endpoint_policies: AHashMap<String, Policy>,
        reporter_config: ReporterConfig,
    ) -> Self {
        Self {
            blacklist,
            controller,
            failure_tracker,
            registry,
            metrics,
            clock,
            endpoint_policies: Arc::new(endpoint_policies),
            reporter_config,
        }
    }

    /// Decide whether a request may proceed to its handler.
    pub async fn admit(&self, ctx: &RequestContext) -> AdmissionDecision {
        if self.blacklist.check(&ctx.identity).await {
            self.metrics.record_blacklist_denial();
            debug!(path = %ctx.path, "request denied by blacklist");
            return AdmissionDecision::Denied(Rejection::Blacklisted);
        }

        let key = ctx.identity.rate_limit_key();

        let sample = BehaviorSample {
            path: ctx.path.clone(),
            method: ctx.method.clone(),
            query_params: ctx.query.clone(),
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(error) = self.controller.analyzer().record_sample(&key, &sample).await {
            warn!(key = %key, error = %error, "failed to record behavior sample");
        }

        let (policy, score) = self
            .controller
            .compute_effective_policy(&key, ctx.tier)
            .await;

        let mut gates = vec![(GENERAL_POLICY, policy)];
        if let Some(class) = ctx.endpoint_class.as_deref() {
            match self.endpoint_policies.get(class) {
                Some(endpoint_policy) => gates.push((class, *endpoint_policy)),
                None => debug!(endpoint_class = class, "no policy for endpoint class"),
            }
        }

        let decisions = self.controller.limiter().consume_all(&key, &gates).await;
        let degraded = decisions.iter().any(|d| d.degraded);

        if let Some(rejected) = decisions.iter().find(|d| d.is_rejected()) {
            let retry_after_secs = ms_to_retry_secs(rejected.outcome.ms_before_next());
            if rejected.degraded {
                self.metrics.record_store_rejection();
                return AdmissionDecision::Denied(Rejection::StoreUnavailable { retry_after_secs });
            }
            self.metrics.record_quota_rejection(&key.to_string());
            debug!(
                key = %key,
                policy = %rejected.policy,
                tier = %ctx.tier,
                retry_after_secs,
                "request denied by quota"
            );
            return AdmissionDecision::Denied(Rejection::QuotaExceeded {
                remaining: 0,
                policy: rejected.policy.clone(),
                tier: ctx.tier,
                retry_after_secs,
            });
        }

        self.metrics.record_admitted();
        let (remaining, reset_after_ms) = decisions
            .first()
            .map(|d| (d.outcome.remaining_points(), d.outcome.ms_before_next()))
            .unwrap_or((policy.points(), 0));
        AdmissionDecision::Admitted(Admission {
            key,
            policy,
            remaining,
            reset_after_ms,
            score,
            degraded,
        })
    }

    /// Report that the handler failed for this request's identity.
    pub async fn record_failure(&self, identity: &Identity) -> FailureOutcome {
        self.failure_tracker
            .record_failed_request(&identity.failure_key())
            .await
    }

    /// Report that the handler succeeded, clearing the identity's failure count.
    pub async fn record_success(&self, identity: &Identity) -> Result<(), StoreError> {
        self.failure_tracker
            .record_success(&identity.failure_key())
            .await
    }

    /// Shared breaker for a dependency, created with defaults if unknown.
    pub fn breaker(&self, dependency: &str) -> SharedCircuitBreaker {
        self.registry.get_or_create(dependency)
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.registry
    }

    /// Deny-list service, for administrative edits.
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn failure_tracker(&self) -> &FailureTracker {
        &self.failure_tracker
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Policy configured for an endpoint class.
    pub fn endpoint_policy(&self, class: &str) -> Option<&Policy> {
        self.endpoint_policies.get(class)
    }

    /// Reporter sharing this guard's metrics and breakers.
    pub fn reporter(&self) -> AbuseReporter {
        AbuseReporter::new(
            self.metrics.clone(),
            self.registry.clone(),
            self.reporter_config,
        )
    }

    /// Collect an admission report now.
    pub fn report(&self) -> AdmissionReport {
        self.reporter().collect()
    }
}

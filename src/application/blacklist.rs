//! Deny-list checks and administration.
//!
//! The blacklist runs before any quota logic. Its failure mode is configured
//! independently of the rate limiter's and defaults to failing open, so an
//! unreachable repository never blocks legitimate traffic.

use crate::application::metrics::Metrics;
use crate::application::ports::{with_timeout, BlacklistRepository, Clock};
use crate::domain::blacklist::{request_identities, BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use crate::domain::key::Identity;
use crate::domain::policy::{duration_to_ms, FailureMode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`Blacklist::escalate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Inserted, or reactivated from an inactive or expired entry
    Listed(BlacklistEntry),
    /// An entry in effect already covered the value
    AlreadyListed(BlacklistEntry),
}

impl Escalation {
    pub fn entry(&self) -> &BlacklistEntry {
        match self {
            Escalation::Listed(entry) | Escalation::AlreadyListed(entry) => entry,
        }
    }
}

/// Deny-list service over a [`BlacklistRepository`].
#[derive(Debug, Clone)]
pub struct Blacklist {
    repository: Arc<dyn BlacklistRepository>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    failure_mode: FailureMode,
    timeout: Duration,
}

impl Blacklist {
    pub fn new(
        repository: Arc<dyn BlacklistRepository>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            repository,
            clock,
            metrics,
            failure_mode: FailureMode::Open,
            timeout: crate::application::limiter::DEFAULT_STORE_TIMEOUT,
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

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Whether any active entry matches the request's IP or user agent.
    pub async fn check(&self, identity: &Identity) -> bool {
        let now = self.clock.now_ms();
        for (entry_type, value) in request_identities(identity) {
            if self.lookup(entry_type, &value, now).await {
                return true;
            }
        }
        false
    }

    /// Whether `(entry_type, value)` is actively listed, for identities such as
    /// emails and card fingerprints that are not part of the request itself.
    pub async fn is_listed(&self, entry_type: BlacklistType, value: &str) -> bool {
        self.lookup(entry_type, value, self.clock.now_ms()).await
    }

    async fn lookup(&self, entry_type: BlacklistType, value: &str, now_ms: u64) -> bool {
        let found = with_timeout(
            self.timeout,
            self.repository.find_active(entry_type, value, now_ms),
        )
        .await;
        match found {
            Ok(Some(_)) => {
                debug!(entry_type = %entry_type, "blacklist match");
                true
            }
            Ok(None) => false,
            Err(error) => {
                self.metrics.record_degraded();
                if self.failure_mode.allows() {
                    warn!(entry_type = %entry_type, error = %error, "blacklist unavailable, failing open");
                    false
                } else {
                    warn!(entry_type = %entry_type, error = %error, "blacklist unavailable, failing closed");
                    true
                }
            }
        }
    }

    /// Add or reactivate an entry. `ttl` of `None` lists the value until deactivated.
    pub async fn add(
        &self,
        entry_type: BlacklistType,
        value: &str,
        reason: &str,
        ttl: Option<Duration>,
    ) -> Result<BlacklistEntry, StoreError> {
        let now = self.clock.now_ms();
        let expires_at_ms = ttl.map(|ttl| now.saturating_add(duration_to_ms(ttl)));
        let entry = BlacklistEntry::new(entry_type, value, reason, now, expires_at_ms);
        with_timeout(self.timeout, self.repository.upsert(entry.clone())).await?;
        info!(
            entry_type = %entry_type,
            value = %entry.value,
            reason,
            expires_at_ms = ?expires_at_ms,
            "blacklist entry added"
        );
        Ok(entry)
    }

    /// List a value automatically without overriding existing decisions.
    ///
    /// An entry already in effect is left untouched, whatever its reason or
    /// expiry. An inactive or expired entry is reactivated in place and keeps
    /// its creation time. Otherwise a new entry is inserted.
    pub async fn escalate(
        &self,
        entry_type: BlacklistType,
        value: &str,
        reason: &str,
        ttl: Duration,
    ) -> Result<Escalation, StoreError> {
        let now = self.clock.now_ms();
        let existing = with_timeout(self.timeout, self.repository.find(entry_type, value)).await?;
        if let Some(entry) = existing.as_ref().filter(|entry| entry.is_effective(now)) {
            debug!(entry_type = %entry_type, value = %entry.value, "value already blacklisted");
            return Ok(Escalation::AlreadyListed(entry.clone()));
        }

        let expires_at_ms = Some(now.saturating_add(duration_to_ms(ttl)));
        let entry = match existing {
            Some(mut entry) => {
                entry.is_active = true;
                entry.reason = reason.to_string();
                entry.expires_at_ms = expires_at_ms;
                entry
            }
            None => BlacklistEntry::new(entry_type, value, reason, now, expires_at_ms),
        };
        with_timeout(self.timeout, self.repository.upsert(entry.clone())).await?;
        info!(
            entry_type = %entry_type,
            value = %entry.value,
            reason,
            expires_at_ms = ?expires_at_ms,
            "blacklist entry escalated"
        );
        Ok(Escalation::Listed(entry))
    }

    /// Deactivate an entry, keeping it for audit. Returns `false` if none existed.
    pub async fn deactivate(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<bool, StoreError> {
        let found =
            with_timeout(self.timeout, self.repository.deactivate(entry_type, value)).await?;
        if found {
            info!(entry_type = %entry_type, value, "blacklist entry deactivated");
        }
        Ok(found)
    }

    /// Entries currently denying traffic.
    pub async fn active_entries(&self) -> Result<Vec<BlacklistEntry>, StoreError> {
        with_timeout(
            self.timeout,
            self.repository.list_active(self.clock.now_ms()),
        )
        .await
    }
}

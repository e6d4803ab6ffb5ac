//! Observability metrics for admission control.
//!
//! Counters for every admission outcome plus a bounded per-key rejection
//! tally used to rank top abusers.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of distinct keys tracked for abuser ranking.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Metrics tracking admission statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    requests_admitted: AtomicU64,
    quota_rejections: AtomicU64,
    blacklist_denials: AtomicU64,
    store_rejections: AtomicU64,
    /// Store faults absorbed by a fail-open or fail-closed policy
    degraded_decisions: AtomicU64,
    escalations: AtomicU64,
    circuit_rejections: AtomicU64,
    rejections_by_key: DashMap<String, u64>,
    max_tracked_keys: usize,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::with_max_tracked_keys(DEFAULT_MAX_TRACKED_KEYS)
    }

    /// Create a tracker that ranks at most `max_tracked_keys` distinct keys.
    ///
    /// Once full, rejections for keys not already tracked are counted in the
    /// totals but not ranked.
    pub fn with_max_tracked_keys(max_tracked_keys: usize) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_admitted: AtomicU64::new(0),
                quota_rejections: AtomicU64::new(0),
                blacklist_denials: AtomicU64::new(0),
                store_rejections: AtomicU64::new(0),
                degraded_decisions: AtomicU64::new(0),
                escalations: AtomicU64::new(0),
                circuit_rejections: AtomicU64::new(0),
                rejections_by_key: DashMap::new(),
                max_tracked_keys,
            }),
        }
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_quota_rejection(&self, key: &str) {
        self.inner.quota_rejections.fetch_add(1, Ordering::Relaxed);
        self.rank(key);
    }

    pub(crate) fn record_blacklist_denial(&self) {
        self.inner.blacklist_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_rejection(&self) {
        self.inner.store_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.inner.degraded_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_escalation(&self, key: &str) {
        self.inner.escalations.fetch_add(1, Ordering::Relaxed);
        self.rank(key);
    }

    pub(crate) fn record_circuit_rejection(&self) {
        self.inner.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn rank(&self, key: &str) {
        if let Some(mut count) = self.inner.rejections_by_key.get_mut(key) {
            *count += 1;
            return;
        }
        if self.inner.rejections_by_key.len() < self.inner.max_tracked_keys {
            *self
                .inner
                .rejections_by_key
                .entry(key.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn requests_admitted(&self) -> u64 {
        self.inner.requests_admitted.load(Ordering::Relaxed)
    }

    pub fn quota_rejections(&self) -> u64 {
        self.inner.quota_rejections.load(Ordering::Relaxed)
    }

    pub fn blacklist_denials(&self) -> u64 {
        self.inner.blacklist_denials.load(Ordering::Relaxed)
    }

    pub fn store_rejections(&self) -> u64 {
        self.inner.store_rejections.load(Ordering::Relaxed)
    }

    pub fn degraded_decisions(&self) -> u64 {
        self.inner.degraded_decisions.load(Ordering::Relaxed)
    }

    pub fn escalations(&self) -> u64 {
        self.inner.escalations.load(Ordering::Relaxed)
    }

    pub fn circuit_rejections(&self) -> u64 {
        self.inner.circuit_rejections.load(Ordering::Relaxed)
    }

    /// Keys with the most rejections, highest first; ties broken by key.
    pub fn top_abusers(&self, n: usize) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .inner
            .rejections_by_key
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_admitted: self.requests_admitted(),
            quota_rejections: self.quota_rejections(),
            blacklist_denials: self.blacklist_denials(),
            store_rejections: self.store_rejections(),
            degraded_decisions: self.degraded_decisions(),
            escalations: self.escalations(),
            circuit_rejections: self.circuit_rejections(),
        }
    }

    /// Reset all metrics to zero and forget ranked keys.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        self.inner.requests_admitted.store(0, Ordering::Relaxed);
        self.inner.quota_rejections.store(0, Ordering::Relaxed);
        self.inner.blacklist_denials.store(0, Ordering::Relaxed);
        self.inner.store_rejections.store(0, Ordering::Relaxed);
        self.inner.degraded_decisions.store(0, Ordering::Relaxed);
        self.inner.escalations.store(0, Ordering::Relaxed);
        self.inner.circuit_rejections.store(0, Ordering::Relaxed);
        self.inner.rejections_by_key.clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_admitted: u64,
    pub quota_rejections: u64,
    pub blacklist_denials: u64,
    /// Requests denied because a fail-closed store was unreachable
    pub store_rejections: u64,
    pub degraded_decisions: u64,
    pub escalations: u64,
    pub circuit_rejections: u64,
}

impl MetricsSnapshot {
    /// Requests seen by the admission pipeline.
    pub fn total_requests(&self) -> u64 {
        self.requests_admitted
            .saturating_add(self.blocked_requests())
    }

    /// Requests denied for any reason.
    pub fn blocked_requests(&self) -> u64 {
        self.quota_rejections
            .saturating_add(self.blacklist_denials)
            .saturating_add(self.store_rejections)
    }

    /// Ratio of blocked to total requests (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.blocked_requests() as f64 / total as f64
        }
    }
}

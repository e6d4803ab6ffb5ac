//! In-process quota store.
//!
//! Sharded maps backed by DashMap. Each consume runs the fixed-window algorithm
//! while holding the key's shard entry, which makes it atomic per key without a
//! global lock. Suitable for single-process deployments and tests.
//!
//! Expired keys are swept by the writes themselves: the first `consume` or
//! `append_bounded` after each purge interval runs [`MemoryQuotaStore::purge_expired`]
//! before touching its own key.

use crate::application::ports::{Clock, QuotaStore, StoreHealth};
use crate::domain::error::StoreError;
use crate::domain::policy::{duration_to_ms, Policy};
use crate::domain::quota::{ConsumeOutcome, QuotaRecord};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default spacing between write-triggered purges.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BoundedList {
    items: VecDeque<Vec<u8>>,
    expires_at_ms: u64,
}

/// Thread-safe quota store backed by DashMap.
#[derive(Debug)]
pub struct MemoryQuotaStore {
    records: DashMap<String, QuotaRecord>,
    lists: DashMap<String, BoundedList>,
    clock: Arc<dyn Clock>,
    purge_interval_ms: u64,
    next_purge_at_ms: AtomicU64,
}

impl MemoryQuotaStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            lists: DashMap::new(),
            clock,
            purge_interval_ms: duration_to_ms(DEFAULT_PURGE_INTERVAL),
            next_purge_at_ms: AtomicU64::new(0),
        }
    }

    /// Minimum time between write-triggered purges.
    ///
    /// Default: [`DEFAULT_PURGE_INTERVAL`]
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval_ms = duration_to_ms(interval);
        self
    }

    /// Number of counter and list keys currently held, including expired ones
    /// not yet purged.
    pub fn len(&self) -> usize {
        self.records.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.lists.is_empty()
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.records.clear();
        self.lists.clear();
    }

    /// Drop keys whose window, block and list TTL have all passed.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.len();
        self.records.retain(|_, record| !record.is_expired(now));
        self.lists.retain(|_, list| list.expires_at_ms > now);
        before.saturating_sub(self.len())
    }

    // Must run before any shard entry is held: retain locks every shard.
    fn maybe_purge(&self, now: u64) {
        let due = self.next_purge_at_ms.load(Ordering::Relaxed);
        if now < due {
            return;
        }
        let next = now.saturating_add(self.purge_interval_ms);
        if self
            .next_purge_at_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed, remaining = self.len(), "purged expired quota keys");
            }
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn consume(&self, key: &str, policy: &Policy) -> Result<ConsumeOutcome, StoreError> {
        let now = self.clock.now_ms();
        self.maybe_purge(now);
        let outcome = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let (record, outcome) = QuotaRecord::consume(Some(*entry.get()), policy, now);
                *entry.get_mut() = record;
                outcome
            }
            Entry::Vacant(entry) => {
                let (record, outcome) = QuotaRecord::consume(None, policy, now);
                entry.insert(record);
                outcome
            }
        };
        Ok(outcome)
    }

    async fn get(&self, key: &str) -> Result<Option<QuotaRecord>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .records
            .get(key)
            .map(|record| *record)
            .filter(|record| !record.is_expired(now)))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        self.lists.remove(key);
        Ok(())
    }

    async fn append_bounded(
        &self,
        key: &str,
        value: Vec<u8>,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        self.maybe_purge(now);
        let expires_at_ms = now.saturating_add(duration_to_ms(ttl));
        let mut list = self
            .lists
            .entry(key.to_string())
            .or_insert_with(|| BoundedList {
                items: VecDeque::new(),
                expires_at_ms,
            });
        if list.expires_at_ms <= now {
            list.items.clear();
        }
        list.items.push_front(value);
        list.items.truncate(cap);
        list.expires_at_ms = expires_at_ms;
        Ok(())
    }

    async fn read_list(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .lists
            .get(key)
            .filter(|list| list.expires_at_ms > now)
            .map(|list| list.items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn health(&self) -> StoreHealth {
        StoreHealth::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn store() -> (Arc<MemoryQuotaStore>, MockClock) {
        let clock = MockClock::new(1_000_000);
        (Arc::new(MemoryQuotaStore::new(Arc::new(clock.clone()))), clock)
    }

    #[tokio::test]
    async fn test_consume_and_get() {
        let (store, _clock) = store();
        let policy = Policy::from_secs(3, 60, 0).unwrap();

        let outcome = store.consume("k", &policy).await.unwrap();
        assert_eq!(outcome.remaining_points(), 2);

        let record = store.get("k").await.unwrap().unwrap();
        assert_eq!(record.consumed_points, 1);

        // get never mutates
        store.get("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().consumed_points, 1);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_window_expiry_through_clock() {
        let (store, clock) = store();
        let policy = Policy::from_secs(1, 10, 0).unwrap();

        assert!(store.consume("k", &policy).await.unwrap().is_allowed());
        assert!(store.consume("k", &policy).await.unwrap().is_rejected());

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.consume("k", &policy).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_key() {
        let (store, _clock) = store();
        let policy = Policy::from_secs(1, 60, 60).unwrap();

        store.consume("k", &policy).await.unwrap();
        assert!(store.consume("k", &policy).await.unwrap().is_rejected());

        store.reset("k").await.unwrap();
        assert!(store.consume("k", &policy).await.unwrap().is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumes_never_exceed_points() {
        let (store, _clock) = store();
        let policy = Policy::from_secs(50, 60, 60).unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume("hot", &policy).await.unwrap().is_allowed()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
        assert_eq!(
            store.get("hot").await.unwrap().unwrap().consumed_points,
            50
        );
    }

    #[tokio::test]
    async fn test_bounded_list_trims_newest_first() {
        let (store, _clock) = store();
        let ttl = Duration::from_secs(60);

        for i in 0..5u8 {
            store.append_bounded("h", vec![i], 3, ttl).await.unwrap();
        }
        assert_eq!(
            store.read_list("h").await.unwrap(),
            vec![vec![4], vec![3], vec![2]]
        );
    }

    #[tokio::test]
    async fn test_bounded_list_expires() {
        let (store, clock) = store();
        store
            .append_bounded("h", vec![1], 10, Duration::from_secs(5))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(store.read_list("h").await.unwrap().is_empty());

        // Appending after expiry starts a fresh list
        store
            .append_bounded("h", vec![2], 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.read_list("h").await.unwrap(), vec![vec![2]]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store();
        let short = Policy::from_secs(5, 1, 0).unwrap();
        let long = Policy::from_secs(5, 600, 0).unwrap();

        store.consume("short", &short).await.unwrap();
        store.consume("long", &long).await.unwrap();
        store
            .append_bounded("list", vec![0], 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(store.len(), 3);

        clock.advance(Duration::from_secs(3));
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writes_purge_expired_keys() {
        let (store, clock) = store();
        let policy = Policy::from_secs(100, 60, 0).unwrap();
        let ttl = Duration::from_secs(3_600);

        for i in 0..1_000 {
            let key = format!("ip:10.0.{}.{}", i / 256, i % 256);
            store.consume(&key, &policy).await.unwrap();
            store
                .append_bounded(&format!("history:{}", key), vec![0], 10, ttl)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 2_000);

        clock.advance(Duration::from_secs(48 * 3_600));
        store.consume("ip:10.9.9.9", &policy).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_waits_for_interval() {
        let clock = MockClock::new(1_000_000);
        let store = MemoryQuotaStore::new(Arc::new(clock.clone()))
            .with_purge_interval(Duration::from_secs(30));
        let policy = Policy::from_secs(5, 1, 0).unwrap();

        store.consume("a", &policy).await.unwrap();
        clock.advance(Duration::from_secs(2));
        // "a" has expired but the next sweep is not due yet
        store.consume("b", &policy).await.unwrap();
        assert_eq!(store.len(), 2);

        clock.advance(Duration::from_secs(28));
        store.consume("c", &policy).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_health_is_always_healthy() {
        let (store, _clock) = store();
        assert!(store.health().await.is_healthy());
    }
}

//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::blacklist::{BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use crate::domain::policy::Policy;
use crate::domain::quota::{ConsumeOutcome, QuotaRecord};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Wall-clock hour of day (0..=23) used for peak-hour decisions.
    fn hour(&self) -> u8;
}

/// Reachability of a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    Unavailable(String),
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, StoreHealth::Healthy)
    }
}

/// Port for the shared counter-with-expiry store.
///
/// `consume` must apply [`QuotaRecord::consume`] as a single atomic step per key:
/// two concurrent consumes for one key may never both observe the same count.
/// Implementations own their notion of "now" so that processes sharing a
/// distributed store agree on window boundaries.
#[async_trait]
pub trait QuotaStore: Send + Sync + Debug {
    /// Consume one point of `policy` for `key`.
    async fn consume(&self, key: &str, policy: &Policy) -> Result<ConsumeOutcome, StoreError>;

    /// Read the live record for `key` without mutating it.
    async fn get(&self, key: &str) -> Result<Option<QuotaRecord>, StoreError>;

    /// Drop any record for `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Push `value` to the front of the list at `key`, trim it to `cap` entries
    /// and refresh its expiry, as one ordered step.
    async fn append_bounded(
        &self,
        key: &str,
        value: Vec<u8>,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Entries of the list at `key`, newest first.
    async fn read_list(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Whether the store can currently serve requests.
    async fn health(&self) -> StoreHealth;
}

/// Port for deny-list persistence.
///
/// Entries are keyed by `(type, normalized value)`; at most one entry exists per key.
#[async_trait]
pub trait BlacklistRepository: Send + Sync + Debug {
    /// The entry for `(entry_type, value)` if it is active and unexpired at `now_ms`.
    async fn find_active(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now_ms: u64,
    ) -> Result<Option<BlacklistEntry>, StoreError>;

    /// The stored entry for `(entry_type, value)` whatever its state.
    async fn find(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError>;

    /// Insert a new entry or replace the existing one for the same key.
    async fn upsert(&self, entry: BlacklistEntry) -> Result<(), StoreError>;

    /// Mark the entry inactive. Returns `false` when no entry exists.
    async fn deactivate(&self, entry_type: BlacklistType, value: &str) -> Result<bool, StoreError>;

    /// All entries effective at `now_ms`.
    async fn list_active(&self, now_ms: u64) -> Result<Vec<BlacklistEntry>, StoreError>;
}

/// Bound a store call by `timeout`, mapping elapsed time to [`StoreError::Timeout`].
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(1)
        };
        let result = with_timeout(Duration::from_millis(250), slow).await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(250))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let fast = async { Err::<u8, _>(StoreError::Unavailable("down".to_string())) };
        let result = with_timeout(Duration::from_secs(1), fast).await;
        assert_eq!(result, Err(StoreError::Unavailable("down".to_string())));
    }

    #[test]
    fn test_store_health() {
        assert!(StoreHealth::Healthy.is_healthy());
        assert!(!StoreHealth::Unavailable("refused".to_string()).is_healthy());
    }
}

//! Store doubles that can be switched into failure.

use crate::application::ports::{BlacklistRepository, Clock, QuotaStore, StoreHealth};
use crate::domain::blacklist::{BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use crate::domain::policy::Policy;
use crate::domain::quota::{ConsumeOutcome, QuotaRecord};
use crate::infrastructure::memory_blacklist::MemoryBlacklist;
use crate::infrastructure::memory_store::MemoryQuotaStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a flaky store misbehaves while failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return `StoreError::Unavailable` immediately
    Refuse,
    /// Sleep for the given duration before answering normally
    Hang(Duration),
}

#[derive(Debug, Default)]
struct FaultSwitch {
    failing: AtomicBool,
    hang_ms: AtomicU64,
    calls: AtomicU64,
}

impl FaultSwitch {
    fn set(&self, fault: Option<Fault>) {
        match fault {
            None => {
                self.failing.store(false, Ordering::SeqCst);
                self.hang_ms.store(0, Ordering::SeqCst);
            }
            Some(Fault::Refuse) => {
                self.hang_ms.store(0, Ordering::SeqCst);
                self.failing.store(true, Ordering::SeqCst);
            }
            Some(Fault::Hang(after)) => {
                self.failing.store(false, Ordering::SeqCst);
                self.hang_ms
                    .store(after.as_millis() as u64, Ordering::SeqCst);
            }
        }
    }

    async fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hang = self.hang_ms.load(Ordering::SeqCst);
        if hang > 0 {
            tokio::time::sleep(Duration::from_millis(hang)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Quota store that delegates to [`MemoryQuotaStore`] until told to fail.
///
/// # Examples
///
/// ```
/// use admission_guard::infrastructure::mocks::{FlakyQuotaStore, Fault, MockClock};
/// use std::sync::Arc;
///
/// let store = FlakyQuotaStore::new(Arc::new(MockClock::new(0)));
/// store.fail_with(Fault::Refuse);
/// assert!(store.is_failing());
/// store.recover();
/// assert!(!store.is_failing());
/// ```
#[derive(Debug)]
pub struct FlakyQuotaStore {
    inner: MemoryQuotaStore,
    switch: FaultSwitch,
}

impl FlakyQuotaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryQuotaStore::new(clock),
            switch: FaultSwitch::default(),
        }
    }

    pub fn fail_with(&self, fault: Fault) {
        self.switch.set(Some(fault));
    }

    pub fn recover(&self) {
        self.switch.set(None);
    }

    pub fn is_failing(&self) -> bool {
        self.switch.failing.load(Ordering::SeqCst) || self.switch.hang_ms.load(Ordering::SeqCst) > 0
    }

    /// Number of store calls attempted, failing or not.
    pub fn calls(&self) -> u64 {
        self.switch.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryQuotaStore {
        &self.inner
    }
}

#[async_trait]
impl QuotaStore for FlakyQuotaStore {
    async fn consume(&self, key: &str, policy: &Policy) -> Result<ConsumeOutcome, StoreError> {
        self.switch.check().await?;
        self.inner.consume(key, policy).await
    }

    async fn get(&self, key: &str) -> Result<Option<QuotaRecord>, StoreError> {
        self.switch.check().await?;
        self.inner.get(key).await
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.switch.check().await?;
        self.inner.reset(key).await
    }

    async fn append_bounded(
        &self,
        key: &str,
        value: Vec<u8>,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.switch.check().await?;
        self.inner.append_bounded(key, value, cap, ttl).await
    }

    async fn read_list(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        self.switch.check().await?;
        self.inner.read_list(key).await
    }

    async fn health(&self) -> StoreHealth {
        if self.switch.failing.load(Ordering::SeqCst) {
            StoreHealth::Unavailable("connection refused".to_string())
        } else {
            StoreHealth::Healthy
        }
    }
}

/// Blacklist repository that delegates to [`MemoryBlacklist`] until told to fail.
#[derive(Debug, Default)]
pub struct FlakyBlacklist {
    inner: MemoryBlacklist,
    switch: FaultSwitch,
}

impl FlakyBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, fault: Fault) {
        self.switch.set(Some(fault));
    }

    pub fn recover(&self) {
        self.switch.set(None);
    }

    pub fn inner(&self) -> &MemoryBlacklist {
        &self.inner
    }
}

#[async_trait]
impl BlacklistRepository for FlakyBlacklist {
    async fn find_active(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now_ms: u64,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        self.switch.check().await?;
        self.inner.find_active(entry_type, value, now_ms).await
    }

    async fn find(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        self.switch.check().await?;
        self.inner.find(entry_type, value).await
    }

    async fn upsert(&self, entry: BlacklistEntry) -> Result<(), StoreError> {
        self.switch.check().await?;
        self.inner.upsert(entry).await
    }

    async fn deactivate(&self, entry_type: BlacklistType, value: &str) -> Result<bool, StoreError> {
        self.switch.check().await?;
        self.inner.deactivate(entry_type, value).await
    }

    async fn list_active(&self, now_ms: u64) -> Result<Vec<BlacklistEntry>, StoreError> {
        self.switch.check().await?;
        self.inner.list_active(now_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    #[tokio::test]
    async fn test_flaky_store_refuses_then_recovers() {
        let store = FlakyQuotaStore::new(Arc::new(MockClock::new(0)));
        let policy = Policy::from_secs(5, 60, 0).unwrap();

        store.fail_with(Fault::Refuse);
        assert!(matches!(
            store.consume("k", &policy).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!store.health().await.is_healthy());

        store.recover();
        assert!(store.consume("k", &policy).await.unwrap().is_allowed());
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_blacklist_hangs() {
        let repo = FlakyBlacklist::new();
        repo.fail_with(Fault::Hang(Duration::from_secs(10)));

        let lookup = tokio::time::timeout(
            Duration::from_millis(100),
            repo.find_active(BlacklistType::Ip, "1.2.3.4", 0),
        )
        .await;
        assert!(lookup.is_err());
    }
}

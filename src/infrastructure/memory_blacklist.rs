//! In-process blacklist repository.

use crate::application::ports::BlacklistRepository;
use crate::domain::blacklist::{BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Deny-list held in a DashMap keyed by `(type, normalized value)`.
///
/// Deactivated entries stay in the map for audit.
#[derive(Debug, Default)]
pub struct MemoryBlacklist {
    entries: DashMap<(BlacklistType, String), BlacklistEntry>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries held, active or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stored entry regardless of state.
    pub fn entry(&self, entry_type: BlacklistType, value: &str) -> Option<BlacklistEntry> {
        self.entries
            .get(&(entry_type, entry_type.normalize(value)))
            .map(|entry| entry.clone())
    }
}

#[async_trait]
impl BlacklistRepository for MemoryBlacklist {
    async fn find_active(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now_ms: u64,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        Ok(self
            .entry(entry_type, value)
            .filter(|entry| entry.is_effective(now_ms)))
    }

    async fn find(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        Ok(self.entry(entry_type, value))
    }

    async fn upsert(&self, entry: BlacklistEntry) -> Result<(), StoreError> {
        self.entries
            .insert((entry.entry_type, entry.value.clone()), entry);
        Ok(())
    }

    async fn deactivate(&self, entry_type: BlacklistType, value: &str) -> Result<bool, StoreError> {
        match self
            .entries
            .get_mut(&(entry_type, entry_type.normalize(value)))
        {
            Some(mut entry) => {
                entry.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active(&self, now_ms: u64) -> Result<Vec<BlacklistEntry>, StoreError> {
        let mut active: Vec<BlacklistEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.is_effective(now_ms))
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by(|a, b| (a.entry_type, &a.value).cmp(&(b.entry_type, &b.value)));
        Ok(active)
    }
}

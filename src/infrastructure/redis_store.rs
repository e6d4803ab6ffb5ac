//! Redis-backed stores for multi-process deployments.
//!
//! Every process sharing a Redis instance sees the same quotas, behavior
//! history and blacklist.
//!
//! ## Layout
//!
//! - Quotas: one hash per key with fields `c` (consumed points), `w` (window
//!   end, epoch ms) and `b` (blocked until, epoch ms), expired with `PEXPIREAT`
//! - Behavior history: one list per key, newest first, trimmed and expired in
//!   the same transaction as the push
//! - Blacklist: one bincode-encoded entry per `(type, value)` plus a set
//!   indexing every entry key. Entry keys carry no TTL; expiry is evaluated on
//!   read so expired and deactivated entries keep their history
//!
//! ## Consistency
//!
//! Consumption runs in a Lua script so read-modify-write is atomic on the
//! server. The script reads the server's `TIME`, so window boundaries do not
//! depend on process clocks. Requires Redis 5 or newer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use admission_guard::{AdmissionGuard, RedisBlacklist, RedisQuotaStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let quotas = RedisQuotaStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let blacklist = RedisBlacklist::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let guard = AdmissionGuard::builder()
//!         .with_quota_store(Arc::new(quotas))
//!         .with_blacklist_repository(Arc::new(blacklist))
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{BlacklistRepository, QuotaStore, StoreHealth};
use crate::domain::blacklist::{BlacklistEntry, BlacklistType};
use crate::domain::error::StoreError;
use crate::domain::policy::{duration_to_ms, Policy};
use crate::domain::quota::{ConsumeOutcome, QuotaRecord};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, Script};
use std::fmt;
use std::time::Duration;
use tracing::warn;

const CONSUME_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local points = tonumber(ARGV[1])
local duration = tonumber(ARGV[2])
local block = tonumber(ARGV[3])

local v = redis.call('HMGET', KEYS[1], 'c', 'w', 'b')
local consumed = tonumber(v[1]) or 0
local window = tonumber(v[2])
local blocked = tonumber(v[3])

if blocked and blocked > now then
  return {0, blocked - now}
end

if not window or window <= now then
  consumed = 0
  window = now + duration
end

if consumed < points then
  consumed = consumed + 1
  redis.call('HSET', KEYS[1], 'c', consumed, 'w', window)
  redis.call('HDEL', KEYS[1], 'b')
  redis.call('PEXPIREAT', KEYS[1], window)
  return {1, points - consumed, window - now}
end

local until_ms = window
if block > 0 then
  until_ms = now + block
  redis.call('HSET', KEYS[1], 'c', consumed, 'w', window, 'b', until_ms)
  redis.call('PEXPIREAT', KEYS[1], math.max(window, until_ms))
end
return {0, until_ms - now}
"#;

fn store_error(error: RedisError) -> StoreError {
    match error.kind() {
        ErrorKind::TypeError => StoreError::Corrupted(error.to_string()),
        _ => StoreError::Unavailable(error.to_string()),
    }
}

/// Configuration for the Redis stores.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Key prefix for every key written (default: "admission:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "admission:".to_string(),
        }
    }
}

async fn connect_manager(url: &str) -> Result<ConnectionManager, RedisError> {
    let client = Client::open(url)?;
    ConnectionManager::new(client).await
}

async fn ping(mut conn: ConnectionManager) -> StoreHealth {
    let result: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
    match result {
        Ok(_) => StoreHealth::Healthy,
        Err(e) => StoreHealth::Unavailable(e.to_string()),
    }
}

/// Quota and history store shared through Redis.
#[derive(Clone)]
pub struct RedisQuotaStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    script: Script,
}

impl fmt::Debug for RedisQuotaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQuotaStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisQuotaStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        Ok(Self {
            connection: connect_manager(url).await?,
            config,
            script: Script::new(CONSUME_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn consume(&self, key: &str, policy: &Policy) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let reply: Vec<u64> = self
            .script
            .key(self.key(key))
            .arg(policy.points())
            .arg(policy.duration_ms())
            .arg(policy.block_duration_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match reply.as_slice() {
            [1, remaining, ms_before_next] => Ok(ConsumeOutcome::Consumed {
                remaining: u32::try_from(*remaining).unwrap_or(u32::MAX),
                ms_before_next: *ms_before_next,
            }),
            [0, retry_after_ms] => Ok(ConsumeOutcome::Rejected {
                retry_after_ms: *retry_after_ms,
            }),
            other => Err(StoreError::Corrupted(format!(
                "unexpected consume reply: {:?}",
                other
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<QuotaRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let (consumed, window, blocked): (Option<u32>, Option<u64>, Option<u64>) = redis::cmd("HMGET")
            .arg(self.key(key))
            .arg("c")
            .arg("w")
            .arg("b")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(match (consumed, window) {
            (Some(consumed_points), Some(window_expires_at_ms)) => Some(QuotaRecord {
                consumed_points,
                window_expires_at_ms,
                blocked_until_ms: blocked,
            }),
            _ => None,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.key(key)).await.map_err(store_error)?;
        Ok(())
    }

    async fn append_bounded(
        &self,
        key: &str,
        value: Vec<u8>,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = self.key(key);
        let stop = isize::try_from(cap).unwrap_or(isize::MAX).saturating_sub(1);
        let ttl_ms = i64::try_from(duration_to_ms(ttl)).unwrap_or(i64::MAX);

        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, value)
            .ignore()
            .ltrim(&key, 0, stop)
            .ignore()
            .pexpire(&key, ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn read_list(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        conn.lrange(self.key(key), 0, -1)
            .await
            .map_err(store_error)
    }

    async fn health(&self) -> StoreHealth {
        ping(self.connection.clone()).await
    }
}

/// Blacklist repository shared through Redis.
#[derive(Clone)]
pub struct RedisBlacklist {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisBlacklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBlacklist")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBlacklist {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        Ok(Self {
            connection: connect_manager(url).await?,
            config,
        })
    }

    fn entry_key(&self, entry_type: BlacklistType, value: &str) -> String {
        format!(
            "{}blacklist:{}:{}",
            self.config.key_prefix,
            entry_type,
            entry_type.normalize(value)
        )
    }

    fn index_key(&self) -> String {
        format!("{}blacklist:index", self.config.key_prefix)
    }

    fn decode(bytes: &[u8]) -> Result<BlacklistEntry, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Corrupted(e.to_string()))
    }

    async fn load(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        let mut conn = self.connection.clone();
        let bytes: Option<Vec<u8>> = conn
            .get(self.entry_key(entry_type, value))
            .await
            .map_err(store_error)?;
        bytes.map(|b| Self::decode(&b)).transpose()
    }
}

#[async_trait]
impl BlacklistRepository for RedisBlacklist {
    async fn find_active(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now_ms: u64,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        Ok(self
            .load(entry_type, value)
            .await?
            .filter(|entry| entry.is_effective(now_ms)))
    }

    async fn find(
        &self,
        entry_type: BlacklistType,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        self.load(entry_type, value).await
    }

    async fn upsert(&self, entry: BlacklistEntry) -> Result<(), StoreError> {
        let key = self.entry_key(entry.entry_type, &entry.value);
        let bytes =
            bincode::serialize(&entry).map_err(|e| StoreError::Corrupted(e.to_string()))?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&key, bytes)
            .ignore()
            .sadd(self.index_key(), &key)
            .ignore();

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(store_error)?;
        Ok(())
    }

    async fn deactivate(&self, entry_type: BlacklistType, value: &str) -> Result<bool, StoreError> {
        match self.load(entry_type, value).await? {
            Some(mut entry) => {
                entry.is_active = false;
                self.upsert(entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active(&self, now_ms: u64) -> Result<Vec<BlacklistEntry>, StoreError> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn
            .smembers(self.index_key())
            .await
            .map_err(store_error)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let mut active = Vec::new();
        // Keys deleted outside this store come back as nil
        for (key, bytes) in keys.iter().zip(values) {
            let Some(bytes) = bytes else { continue };
            match Self::decode(&bytes) {
                Ok(entry) if entry.is_effective(now_ms) => active.push(entry),
                Ok(_) => {}
                Err(error) => warn!(key = %key, error = %error, "skipping undecodable blacklist entry"),
            }
        }

        active.sort_by(|a, b| (a.entry_type, &a.value).cmp(&(b.entry_type, &b.value)));
        Ok(active)
    }
}

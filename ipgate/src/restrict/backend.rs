use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::error::RestrictError;

/// Byte-valued key/value store with per-key TTL backing both cache tiers.
///
/// Callers treat every error as a miss (read) or a no-op (write).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RestrictError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RestrictError>;
}

#[async_trait]
impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RestrictError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RestrictError> {
        (**self).set(key, value, ttl).await
    }
}

#[derive(Debug)]
struct Entry {
    expires_at: Instant,
    value: Vec<u8>,
}

/// Process-local backend. Per-key last-write-wins.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.table.len();
        self.table.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.table.len())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RestrictError> {
        let now = Instant::now();
        if let Some(e) = self.table.get(key) {
            if now < e.expires_at {
                return Ok(Some(e.value.clone()));
            }
        }
        // expired entries are left for prune_expired
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RestrictError> {
        if ttl.is_zero() {
            self.table.remove(key);
            return Ok(());
        }
        self.table.insert(
            key.to_string(),
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
        Ok(())
    }
}

/// Redis backend shared by every gate instance pointing at the same server.
///
/// The connection manager reconnects on its own; a failed command surfaces
/// as `CacheBackend` and the caller falls through to the rule store.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, RestrictError> {
        let client = redis::Client::open(url).map_err(RestrictError::backend)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(RestrictError::backend)?;
        Ok(Self { conn })
    }
}

impl From<redis::RedisError> for RestrictError {
    fn from(err: redis::RedisError) -> Self {
        Self::CacheBackend(err.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RestrictError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RestrictError> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            conn.del::<_, ()>(key).await?;
            return Ok(());
        }
        // PSETEX keeps sub-second TTLs; rounding down to zero would be rejected
        let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ms).await?;
        Ok(())
    }
}

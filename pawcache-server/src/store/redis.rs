use super::CacheStore;
use crate::core::{CacheError, GlobPattern, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

/// Cache store backed by a Redis-compatible server shared by every instance
///
/// Uses a multiplexed [`ConnectionManager`] that reconnects on its own; each
/// operation works on a cheap clone of it.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    scan_count: usize,
}

impl RedisStore {
    /// Open the connection manager for `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, scan_count: usize) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {}", e)))?;
        let manager = ConnectionManager::new(client).await?;

        info!("Connected to Redis cache store (scan_count={})", scan_count);
        Ok(Self {
            manager,
            scan_count: scan_count.max(1),
        })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        if ttl_secs == 0 {
            return Err(CacheError::TTLInvalid(format!(
                "TTL for '{}' must be positive",
                key
            )));
        }

        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let glob = GlobPattern::compile(pattern)?;
        let mut conn = self.manager.clone();

        if glob.is_literal() {
            let deleted: usize = conn.del(glob.literal_prefix()).await?;
            return Ok(deleted);
        }

        // SCAN is not atomic with the deletes; keys written mid-scan may survive
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: usize = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("DELETE MATCHING pattern={}, deleted={}", pattern, deleted);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

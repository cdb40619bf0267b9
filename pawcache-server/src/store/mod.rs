//! Cache store backends
//!
//! [`CacheStore`] is the contract the caching layer needs from a key-value
//! service: TTL-bounded writes, point reads, existence checks and glob-based
//! bulk deletion. Backends report connectivity problems as errors; the
//! [`SharedStore`] wrapper turns every such error into a cache miss.

mod memory;
mod redis;
mod shared;

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use shared::SharedStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::core::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Key-value service backing the response cache
///
/// Implementations must be safe to share across request tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a value. A missing or expired key is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous one, expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;

    /// Delete every key matching a glob pattern and return how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;

    /// Check whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Short backend name for logs and stats
    fn backend(&self) -> &'static str;

    /// Release background tasks and connections
    async fn shutdown(&self) {}
}

/// Build the configured backend
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CacheStore>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::new(config.memory.clone());
            store.start_ttl_cleanup();
            Ok(Arc::new(store))
        }
        StoreBackend::Redis => {
            info!("Connecting to Redis cache store");
            let store = RedisStore::connect(&config.redis_url, config.scan_count).await?;
            Ok(Arc::new(store))
        }
    }
}

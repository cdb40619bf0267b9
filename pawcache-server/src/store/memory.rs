use super::CacheStore;
use crate::core::{
    CacheError, GlobPattern, MemoryStats, MemoryStoreConfig, Result, StoredValue,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use radix_trie::{Trie, TrieCommon};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-process cache store using a radix trie keyspace
///
/// The trie doubles as a prefix index for pattern deletion: only the subtree
/// under a pattern's literal prefix is scanned.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<Trie<String, StoredValue>>>,
    stats: Arc<RwLock<MemoryStats>>,
    config: MemoryStoreConfig,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryStore {
    /// Create a new store with the given configuration
    pub fn new(config: MemoryStoreConfig) -> Self {
        info!(
            "Initializing memory cache store with max_memory={}MB",
            config.max_memory_mb
        );

        Self {
            data: Arc::new(RwLock::new(Trie::new())),
            stats: Arc::new(RwLock::new(MemoryStats::default())),
            config,
            cleanup_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start background TTL cleanup task
    pub fn start_ttl_cleanup(&self) {
        let interval_ms = self.config.ttl_cleanup_interval_ms;
        info!("Starting TTL cleanup task (interval={}ms)", interval_ms);

        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                interval.tick().await;
                store.cleanup_expired();
            }
        });

        if let Some(previous) = self.cleanup_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Get key count and memory footprint
    pub fn stats(&self) -> MemoryStats {
        self.stats.read().clone()
    }

    /// Remove keys from the trie, keeping stats in step
    fn remove_keys(&self, data: &mut Trie<String, StoredValue>, keys: &[String]) -> usize {
        let mut stats = self.stats.write();
        let mut live = 0;

        for key in keys {
            if let Some(removed) = data.remove(key) {
                if !removed.is_expired() {
                    live += 1;
                }
                stats.total_keys = stats.total_keys.saturating_sub(1);
                stats.total_memory_bytes = stats
                    .total_memory_bytes
                    .saturating_sub(Self::estimate_entry_size(key, &removed));
            }
        }

        live
    }

    /// Clean up expired keys
    fn cleanup_expired(&self) {
        let mut data = self.data.write();

        let expired_keys: Vec<String> = data
            .iter()
            .filter(|(_, v)| v.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        if !expired_keys.is_empty() {
            debug!("Cleaning up {} expired keys", expired_keys.len());
            self.remove_keys(&mut data, &expired_keys);
        }
    }

    /// Estimate memory size of an entry
    fn estimate_entry_size(key: &str, value: &StoredValue) -> usize {
        key.len() + value.data.len() + std::mem::size_of::<StoredValue>()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let data = self.data.read();
            match data.get(key) {
                None => return Ok(None),
                Some(value) if !value.is_expired() => return Ok(Some(value.data.clone())),
                Some(_) => {}
            }
        }

        debug!("Key expired: {}", key);
        let mut data = self.data.write();
        if data.get(key).is_some_and(StoredValue::is_expired) {
            self.remove_keys(&mut data, &[key.to_string()]);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        if ttl_secs == 0 {
            return Err(CacheError::TTLInvalid(format!(
                "TTL for '{}' must be positive",
                key
            )));
        }
        debug!("SET key={}, size={}, ttl={}", key, value.len(), ttl_secs);

        let stored = StoredValue::new(value, ttl_secs);
        let entry_size = Self::estimate_entry_size(key, &stored);

        let mut data = self.data.write();
        let previous_size = data
            .get(key)
            .map(|prev| Self::estimate_entry_size(key, prev))
            .unwrap_or(0);

        // Check memory limits
        {
            let stats = self.stats.read();
            let max_bytes = self.config.max_memory_mb * 1024 * 1024;
            let projected = stats.total_memory_bytes.saturating_sub(previous_size) + entry_size;
            if projected > max_bytes {
                warn!(
                    "Memory limit exceeded: {}/{}",
                    stats.total_memory_bytes, max_bytes
                );
                return Err(CacheError::MemoryLimitExceeded);
            }
        }

        let is_new = data.insert(key.to_string(), stored).is_none();

        let mut stats = self.stats.write();
        if is_new {
            stats.total_keys += 1;
        }
        stats.total_memory_bytes =
            stats.total_memory_bytes.saturating_sub(previous_size) + entry_size;

        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let glob = GlobPattern::compile(pattern)?;
        let prefix = glob.literal_prefix();

        let mut data = self.data.write();
        let keys: Vec<String> = if glob.is_literal() {
            data.get(&prefix)
                .map(|_| vec![prefix.clone()])
                .unwrap_or_default()
        } else if prefix.is_empty() {
            data.keys().filter(|k| glob.matches(k)).cloned().collect()
        } else {
            data.get_raw_descendant(prefix.as_str())
                .map(|subtrie| {
                    subtrie
                        .keys()
                        .filter(|k| glob.matches(k))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let deleted = self.remove_keys(&mut data, &keys);
        debug!("DELETE MATCHING pattern={}, deleted={}", pattern, deleted);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let data = self.data.read();
        Ok(data.get(key).is_some_and(|value| !value.is_expired()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
            info!("Stopped TTL cleanup task");
        }
    }
}

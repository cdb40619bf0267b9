use super::CacheStore;
use crate::core::{CacheCounters, CacheError, CacheStats, Result, glob};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Fail-open handle to the process-wide cache store
///
/// Every operation runs under a timeout; errors and timeouts are logged and
/// reported as "absent" or "not done", never propagated. Keys and patterns
/// are namespaced with the configured prefix here, so callers always work
/// with bare keys.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<dyn CacheStore>,
    op_timeout: Duration,
    key_prefix: Arc<str>,
    counters: Arc<CacheCounters>,
}

impl SharedStore {
    pub fn new(inner: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self {
            inner,
            op_timeout,
            key_prefix: Arc::from(""),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Namespace every key and pattern with `prefix`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Arc::from(prefix.into());
        self
    }

    pub fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Look up a key; store failures read as a miss
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let key = self.namespaced(key);
        self.guarded("get", &key, self.inner.get(&key))
            .await
            .flatten()
    }

    /// Store a value; returns false when the write did not happen
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> bool {
        let key = self.namespaced(key);
        self.guarded("set", &key, self.inner.set(&key, value, ttl_secs))
            .await
            .is_some()
    }

    /// Delete keys matching a pattern; `None` when the store could not do it
    pub async fn delete_matching(&self, pattern: &str) -> Option<usize> {
        let pattern = self.namespaced_pattern(pattern);
        self.guarded(
            "delete_matching",
            &pattern,
            self.inner.delete_matching(&pattern),
        )
        .await
    }

    /// Check for a live key; store failures read as absent
    pub async fn exists(&self, key: &str) -> bool {
        let key = self.namespaced(key);
        self.guarded("exists", &key, self.inner.exists(&key))
            .await
            .unwrap_or(false)
    }

    /// Close the backend
    pub async fn shutdown(&self) {
        info!("Shutting down {} cache store", self.backend());
        self.inner.shutdown().await;
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn namespaced_pattern(&self, pattern: &str) -> String {
        format!("{}{}", glob::escape(&self.key_prefix), pattern)
    }

    async fn guarded<T, F>(&self, operation: &'static str, subject: &str, op: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout.as_millis() as u64)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(value) => {
                metrics::record_store_op(operation, "ok", elapsed);
                Some(value)
            }
            Err(e) => {
                let status = match e {
                    CacheError::Timeout(_) => "timeout",
                    _ => "error",
                };
                metrics::record_store_op(operation, status, elapsed);
                CacheCounters::incr(&self.counters.store_errors);
                warn!(
                    operation,
                    key = subject,
                    backend = self.inner.backend(),
                    error = %e,
                    "cache store operation failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryStoreConfig;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_secs: u64) -> Result<()> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }

        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CacheStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(b"late".to_vec()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_secs: u64) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_noop() {
        let store = SharedStore::new(Arc::new(DownStore), Duration::from_millis(100));

        assert_eq!(store.get("pet:42").await, None);
        assert!(!store.set("pet:42", b"rex".to_vec(), 60).await);
        assert_eq!(store.delete_matching("pet:*").await, None);
        assert!(!store.exists("pet:42").await);

        assert_eq!(store.stats().store_errors, 4);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = SharedStore::new(Arc::new(SlowStore), Duration::from_millis(50));

        let started = Instant::now();
        assert_eq!(store.get("pet:42").await, None);
        assert!(!store.exists("pet:42").await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(store.stats().store_errors, 2);
    }

    #[tokio::test]
    async fn test_key_prefix_is_applied_to_keys_and_patterns() {
        let memory = MemoryStore::new(MemoryStoreConfig::default());
        let store = SharedStore::new(Arc::new(memory.clone()), Duration::from_millis(250))
            .with_key_prefix("paw:");

        assert!(store.set("pet:42", b"rex".to_vec(), 60).await);
        assert!(memory.exists("paw:pet:42").await.unwrap());
        assert!(store.exists("pet:42").await);

        assert_eq!(store.delete_matching("pet:*").await, Some(1));
        assert!(!memory.exists("paw:pet:42").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_prefix_metacharacters_are_escaped() {
        let memory = MemoryStore::new(MemoryStoreConfig::default());
        let store = SharedStore::new(Arc::new(memory.clone()), Duration::from_millis(250))
            .with_key_prefix("a*:");

        memory.set("ab:pet:1", b"other".to_vec(), 60).await.unwrap();
        assert!(store.set("pet:1", b"mine".to_vec(), 60).await);

        assert_eq!(store.delete_matching("pet:*").await, Some(1));
        assert!(memory.exists("ab:pet:1").await.unwrap());
    }
}

//! Axum middleware for response caching
//!
//! [`ResponseCache`] owns the store handle, the policy table and the cache
//! writer. Routes are wired by name:
//!
//! - [`ResponseCache::route`] gives the state for [`cache_middleware`]
//! - [`ResponseCache::invalidation`] gives the state for
//!   [`invalidate_cache_middleware`]
//!
//! Unknown names fail at wiring time rather than on the first request.

mod cache;
mod invalidate;
mod writer;

pub use cache::{CachedRoute, cache_middleware};
pub use invalidate::{InvalidatingRoute, invalidate_cache_middleware};
pub use writer::CacheWriter;

use crate::config::{CacheConfig, ServerConfig};
use crate::core::{CacheCounters, CacheStats, Result};
use crate::metrics;
use crate::policy::{PolicyTable, ResolvedPatterns, SkippedPattern};
use crate::store::{self, SharedStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct Inner {
    store: SharedStore,
    policies: PolicyTable,
    writer: CacheWriter,
    enabled: bool,
    max_body_bytes: usize,
}

/// Shared handle to the response cache
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

/// Outcome of one invalidation batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvalidationReport {
    pub patterns: Vec<String>,
    pub skipped: Vec<SkippedPattern>,
    pub deleted: u64,
    /// Patterns the store could not process
    pub failed: Vec<String>,
}

impl ResponseCache {
    /// Validate the policy table and start the cache writer
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(store: SharedStore, config: &CacheConfig) -> Result<Self> {
        config.policies.validate()?;
        for gap in config.policies.coverage_gaps() {
            warn!(
                route = %gap.read,
                key = %gap.sample_key,
                "No write route clears this read; entries expire by TTL only"
            );
        }

        let writer = CacheWriter::spawn(store.clone(), config.write_queue_capacity);
        info!(
            "Response cache ready (backend={}, enabled={}, reads={}, writes={})",
            store.backend(),
            config.enabled,
            config.policies.reads.len(),
            config.policies.writes.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                policies: config.policies.clone(),
                writer,
                enabled: config.enabled,
                max_body_bytes: config.max_body_bytes,
            }),
        })
    }

    /// Connect the configured store and build the cache on top of it
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let backend = store::connect(&config.store).await?;
        let store = SharedStore::new(backend, config.store.op_timeout())
            .with_key_prefix(config.cache.key_prefix.clone());
        Self::new(store, &config.cache)
    }

    /// Middleware state for a named read route
    pub fn route(&self, name: &str) -> Result<CachedRoute> {
        let policy = self.inner.policies.read(name)?;
        Ok(CachedRoute {
            name: Arc::from(name),
            policy: Arc::new(policy.clone()),
            cache: self.clone(),
        })
    }

    /// Middleware state for a named write route
    pub fn invalidation(&self, name: &str) -> Result<InvalidatingRoute> {
        let rule = self.inner.policies.write(name)?;
        Ok(InvalidatingRoute {
            name: Arc::from(name),
            rule: Arc::new(rule.clone()),
            cache: self.clone(),
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.inner.policies
    }

    pub fn writer(&self) -> &CacheWriter {
        &self.inner.writer
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner.max_body_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Delete every resolved pattern, recording what happened
    ///
    /// Cache writes still queued from earlier responses are superseded first.
    /// Failures are logged and counted; the batch always runs to the end.
    pub async fn invalidate(&self, route: &str, resolved: ResolvedPatterns) -> InvalidationReport {
        let started = Instant::now();
        let counters = self.inner.store.counters();

        for skipped in &resolved.skipped {
            debug!(
                route,
                template = %skipped.template,
                missing = %skipped.missing,
                "Skipping unresolvable invalidation pattern"
            );
        }

        let mut report = InvalidationReport {
            patterns: resolved.patterns,
            skipped: resolved.skipped,
            ..Default::default()
        };

        // Queued writes from before this point must not land after the deletes
        if !report.patterns.is_empty() {
            self.inner.writer.fence().await;
        }

        for pattern in &report.patterns {
            CacheCounters::incr(&counters.invalidations);
            match self.inner.store.delete_matching(pattern).await {
                Some(deleted) => report.deleted += deleted as u64,
                None => {
                    CacheCounters::incr(&counters.invalidation_failures);
                    report.failed.push(pattern.clone());
                }
            }
        }
        CacheCounters::add(&counters.keys_invalidated, report.deleted);

        let status = if report.failed.is_empty() { "ok" } else { "partial" };
        metrics::record_invalidation(route, status, report.deleted);

        if report.failed.is_empty() {
            info!(
                route,
                patterns = ?report.patterns,
                deleted = report.deleted,
                latency_ms = started.elapsed().as_millis() as u64,
                "Cache invalidated"
            );
        } else {
            warn!(
                route,
                patterns = ?report.patterns,
                failed = ?report.failed,
                deleted = report.deleted,
                latency_ms = started.elapsed().as_millis() as u64,
                "Cache invalidation incomplete"
            );
        }

        report
    }

    /// Drain queued writes, then close the store
    pub async fn shutdown(&self) {
        self.inner.writer.shutdown().await;
        self.inner.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CacheError, MemoryStoreConfig};
    use crate::policy::{Resource, WriteRule, test_context};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn cache(config: CacheConfig) -> ResponseCache {
        let store = SharedStore::new(
            Arc::new(MemoryStore::new(MemoryStoreConfig::default())),
            Duration::from_millis(250),
        );
        ResponseCache::new(store, &config).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_names_fail_at_wiring() {
        let cache = cache(CacheConfig::default());
        assert!(cache.route("pet_detail").is_ok());
        assert!(cache.invalidation("update_pet").is_ok());
        assert!(matches!(cache.route("update_pet"), Err(CacheError::UnknownPolicy(_))));
        assert!(matches!(cache.invalidation("pet_detail"), Err(CacheError::UnknownPolicy(_))));
    }

    #[tokio::test]
    async fn test_invalid_table_rejected() {
        let mut config = CacheConfig::default();
        config.policies = PolicyTable::empty().with_write("w", WriteRule::default());

        let store = SharedStore::new(
            Arc::new(MemoryStore::new(MemoryStoreConfig::default())),
            Duration::from_millis(250),
        );
        assert!(ResponseCache::new(store, &config).is_err());
    }

    #[tokio::test]
    async fn test_invalidate_reports_and_counts() {
        let cache = cache(CacheConfig::default());
        let store = cache.store();
        store.set("user:7:pet:42", b"a".to_vec(), 60).await;
        store.set("user:8:pet:42:stats", b"b".to_vec(), 60).await;
        store.set("user:7:pet:43", b"c".to_vec(), 60).await;

        let rule = WriteRule::new([Resource::Pet]);
        let ctx = test_context("/pets/42", "", &[("petId", "42")], Some("7"));
        let report = cache.invalidate("update_pet", rule.resolve(&ctx)).await;

        assert_eq!(report.deleted, 2);
        assert!(report.failed.is_empty());
        assert!(store.exists("user:7:pet:43").await);

        let stats = cache.stats();
        assert_eq!(stats.keys_invalidated, 2);
        assert_eq!(stats.invalidations, report.patterns.len() as u64);
        cache.shutdown().await;
    }
}

use super::error::{CacheError, Result};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Stored value in the in-memory store with metadata
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// Raw byte data
    pub data: Vec<u8>,
    /// Expiration time
    pub expires_at: Instant,
}

impl StoredValue {
    /// Create a new stored value that expires after `ttl_secs`
    pub fn new(data: Vec<u8>, ttl_secs: u64) -> Self {
        Self {
            data,
            expires_at: Instant::now() + std::time::Duration::from_secs(ttl_secs),
        }
    }

    /// Check if the value has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Configuration for the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Maximum memory in MB
    pub max_memory_mb: usize,
    /// TTL cleanup interval in milliseconds
    pub ttl_cleanup_interval_ms: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            ttl_cleanup_interval_ms: 1000,
        }
    }
}

/// Key count and memory footprint of the in-memory store
#[derive(Debug, Default, Clone, Serialize)]
pub struct MemoryStats {
    pub total_keys: usize,
    pub total_memory_bytes: usize,
}

/// Process-local counters for the caching layer
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub store_errors: AtomicU64,
    pub sets: AtomicU64,
    pub set_failures: AtomicU64,
    pub writes_dropped: AtomicU64,
    pub writes_superseded: AtomicU64,
    pub invalidations: AtomicU64,
    pub keys_invalidated: AtomicU64,
    pub invalidation_failures: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of the counters for reporting
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
            writes_superseded: self.writes_superseded.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for the caching layer
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the store
    pub hits: u64,
    /// Lookups that fell through to the handler (includes store errors)
    pub misses: u64,
    /// Store operations that failed or timed out
    pub store_errors: u64,
    pub sets: u64,
    pub set_failures: u64,
    /// Writes discarded because the writer queue was full
    pub writes_dropped: u64,
    /// Writes discarded because an invalidation ran after their response was produced
    pub writes_superseded: u64,
    /// Pattern deletions issued
    pub invalidations: u64,
    pub keys_invalidated: u64,
    pub invalidation_failures: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A response captured for the cache
///
/// Status, content type and body are enough to replay what the handler sent;
/// the payload is stored as a MessagePack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, content_type: Option<&HeaderValue>, body: Bytes) -> Self {
        Self {
            status: status.as_u16(),
            content_type: content_type
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::SerializationError(e.to_string()))
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        if let Some(value) = self
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_value_expiry() {
        let value = StoredValue::new(b"x".to_vec(), 0);
        assert!(value.is_expired());

        let value = StoredValue::new(b"x".to_vec(), 60);
        assert!(!value.is_expired());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_cached_response_keeps_content_type_and_body() {
        let content_type = HeaderValue::from_static("application/json");
        let cached = CachedResponse::new(
            StatusCode::OK,
            Some(&content_type),
            Bytes::from_static(br#"{"id":42}"#),
        );

        let decoded = CachedResponse::decode(&cached.encode().unwrap()).unwrap();
        assert_eq!(decoded, cached);

        let response = decoded.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let err = CachedResponse::decode(b"\xc1not-msgpack").unwrap_err();
        assert!(matches!(err, CacheError::SerializationError(_)));
    }
}

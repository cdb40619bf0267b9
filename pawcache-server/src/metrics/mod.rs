//! Prometheus metrics for the response cache
//!
//! - Lookups per route (hit, miss, error)
//! - Fire-and-forget writes (ok, error, dropped, skipped)
//! - Invalidation batches and keys removed
//! - Store operation latency

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec,
};

lazy_static! {
    /// Cache lookups by route and result (hit, miss, error)
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pawcache_lookups_total",
        "Total number of cache lookups by route and result",
        &["route", "result"]
    ).unwrap();

    /// Cache writes by status (ok, error, dropped, skipped)
    pub static ref CACHE_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pawcache_writes_total",
        "Total number of cache writes by status",
        &["status"]
    ).unwrap();

    /// Invalidation batches by route and status
    pub static ref CACHE_INVALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pawcache_invalidations_total",
        "Total number of invalidation batches by route and status",
        &["route", "status"]
    ).unwrap();

    /// Keys removed by invalidation
    pub static ref CACHE_KEYS_INVALIDATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pawcache_keys_invalidated_total",
        "Total number of cache keys removed by invalidation",
        &["route"]
    ).unwrap();

    /// Store operation latency in seconds
    pub static ref STORE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "pawcache_store_operation_duration_seconds",
        "Cache store operation latency in seconds",
        &["operation", "status"],
        vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 1.0]
    ).unwrap();
}

/// Force registration so the collectors show up before the first request
pub fn init_metrics() {
    let _ = &*CACHE_LOOKUPS_TOTAL;
    let _ = &*CACHE_WRITES_TOTAL;
    let _ = &*CACHE_INVALIDATIONS_TOTAL;
    let _ = &*CACHE_KEYS_INVALIDATED_TOTAL;
    let _ = &*STORE_OP_DURATION;
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a cache lookup
pub fn record_lookup(route: &str, result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[route, result]).inc();
}

/// Record a cache write outcome
pub fn record_write(status: &str) {
    CACHE_WRITES_TOTAL.with_label_values(&[status]).inc();
}

/// Record an invalidation batch
pub fn record_invalidation(route: &str, status: &str, keys: u64) {
    CACHE_INVALIDATIONS_TOTAL
        .with_label_values(&[route, status])
        .inc();
    CACHE_KEYS_INVALIDATED_TOTAL
        .with_label_values(&[route])
        .inc_by(keys);
}

/// Record store operation latency
pub fn record_store_op(operation: &str, status: &str, duration_secs: f64) {
    STORE_OP_DURATION
        .with_label_values(&[operation, status])
        .observe(duration_secs);
}

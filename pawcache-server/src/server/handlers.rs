use crate::core::{CacheError, GlobPattern};
use crate::middleware::{InvalidationReport, ResponseCache};
use crate::policy::{PolicyTable, RequestContext, ResolvedPatterns, Resource};
use axum::{
    Json,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Application state shared across ops handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: ResponseCache,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub patterns: Vec<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "pawcache",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.cache.store().backend(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.cache.stats();
    Json(json!({
        "backend": state.cache.store().backend(),
        "enabled": state.cache.enabled(),
        "hit_rate": stats.hit_rate(),
        "pending_writes": state.cache.writer().pending(),
        "stats": stats,
    }))
}

/// GET /cache/policies
pub async fn cache_policies(State(state): State<AppState>) -> Json<PolicyTable> {
    Json(state.cache.policies().clone())
}

/// GET /cache/keys/{*key}
pub async fn cache_key_exists(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<Value> {
    let exists = state.cache.store().exists(&key).await;
    Json(json!({ "key": key, "exists": exists }))
}

/// POST /cache/invalidate
pub async fn cache_invalidate(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidationReport>, CacheError> {
    if req.patterns.is_empty() {
        return Err(CacheError::InvalidRequest("no patterns given".into()));
    }

    let mut resolved = ResolvedPatterns::default();
    for pattern in req.patterns {
        GlobPattern::compile(&pattern)?;
        if !resolved.patterns.contains(&pattern) {
            resolved.patterns.push(pattern);
        }
    }

    info!("Manual invalidation of {} patterns", resolved.patterns.len());
    let report = state.cache.invalidate("ops", resolved).await;
    Ok(Json(report))
}

/// POST /cache/invalidate/{resource}
///
/// The body names the identifiers the generator needs, e.g.
/// `{"user": "7", "petId": 42}`.
pub async fn cache_invalidate_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(ids): Json<BTreeMap<String, Value>>,
) -> Result<Json<InvalidationReport>, CacheError> {
    let resource = Resource::parse(&resource)
        .ok_or_else(|| CacheError::InvalidRequest(format!("unknown resource '{}'", resource)))?;

    let mut params = BTreeMap::new();
    for (name, value) in ids {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(CacheError::InvalidRequest(format!(
                    "identifier '{}' must be a string or number, got {}",
                    name, other
                )));
            }
        };
        params.insert(name, value);
    }

    let ctx = RequestContext {
        method: Method::POST,
        path: format!("/cache/invalidate/{}", resource),
        query: String::new(),
        user_id: params.remove("user"),
        params,
        client_ip: None,
    };

    let resolved = ResolvedPatterns::resolve(&resource.templates(), &ctx);
    info!(
        "Manual invalidation of resource {} ({} patterns, {} skipped)",
        resource,
        resolved.patterns.len(),
        resolved.skipped.len()
    );
    let report = state.cache.invalidate("ops", resolved).await;
    Ok(Json(report))
}

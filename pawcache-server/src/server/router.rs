use super::handlers::{self, AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the ops router: health, metrics and cache administration
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Prometheus metrics
        .route("/metrics", get(handlers::metrics_handler))
        // Cache administration
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/policies", get(handlers::cache_policies))
        .route("/cache/keys/{*key}", get(handlers::cache_key_exists))
        .route("/cache/invalidate", post(handlers::cache_invalidate))
        .route(
            "/cache/invalidate/{resource}",
            post(handlers::cache_invalidate_resource),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

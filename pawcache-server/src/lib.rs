pub mod auth;
pub mod config;
pub mod core;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use auth::AuthContext;
pub use config::{ServerConfig, StoreBackend};
pub use core::{CacheError, CacheStats, CachedResponse, GlobPattern, Result};
pub use metrics::init_metrics;
pub use middleware::{
    CachedRoute, InvalidatingRoute, InvalidationReport, ResponseCache, cache_middleware,
    invalidate_cache_middleware,
};
pub use policy::{
    CacheCondition, CoverageGap, KeyStrategy, KeyTemplate, PolicyTable, ReadPolicy,
    RequestContext, Resource, WriteRule,
};
pub use server::{AppState, create_router};
pub use store::{CacheStore, MemoryStore, RedisStore, SharedStore};

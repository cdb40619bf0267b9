use super::ResponseCache;
use crate::policy::{RequestContext, WriteRule};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Middleware state for one invalidating write route
#[derive(Clone)]
pub struct InvalidatingRoute {
    pub(super) name: Arc<str>,
    pub(super) rule: Arc<WriteRule>,
    pub(super) cache: ResponseCache,
}

impl InvalidatingRoute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &WriteRule {
        &self.rule
    }
}

/// Clear the cache entries a successful write made stale
///
/// The handler runs first. Only a 2xx response triggers invalidation, and
/// the deletions finish before the response is returned.
pub async fn invalidate_cache_middleware(
    State(route): State<InvalidatingRoute>,
    request: Request,
    next: Next,
) -> Response {
    if !route.cache.enabled() {
        return next.run(request).await;
    }

    let (request, ctx) = RequestContext::extract(request).await;
    let response = next.run(request).await;

    if !response.status().is_success() {
        debug!(
            route = %route.name,
            status = response.status().as_u16(),
            "Write failed, keeping cache"
        );
        return response;
    }

    let resolved = route.rule.resolve(&ctx);
    route.cache.invalidate(&route.name, resolved).await;

    response
}

use super::ResponseCache;
use crate::core::{CacheCounters, CachedResponse};
use crate::metrics;
use crate::policy::{ReadPolicy, RequestContext};
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Middleware state for one cached read route
#[derive(Clone)]
pub struct CachedRoute {
    pub(super) name: Arc<str>,
    pub(super) policy: Arc<ReadPolicy>,
    pub(super) cache: ResponseCache,
}

impl CachedRoute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &ReadPolicy {
        &self.policy
    }
}

/// Read-through cache in front of a handler
///
/// ```ignore
/// Router::new().route(
///     "/pets/{petId}",
///     get(pet_detail.layer(from_fn_with_state(cache.route("pet_detail")?, cache_middleware))),
/// )
/// ```
pub async fn cache_middleware(
    State(route): State<CachedRoute>,
    request: Request,
    next: Next,
) -> Response {
    if !route.cache.enabled() {
        return next.run(request).await;
    }

    let started = Instant::now();
    let (request, ctx) = RequestContext::extract(request).await;
    let key = route.policy.key_for(&ctx);
    let counters = route.cache.store().counters();

    if let Some(bytes) = route.cache.store().get(&key).await {
        match CachedResponse::decode(&bytes) {
            Ok(cached) => {
                CacheCounters::incr(&counters.hits);
                metrics::record_lookup(&route.name, "hit");
                debug!(
                    route = %route.name,
                    key = %key,
                    latency_us = started.elapsed().as_micros() as u64,
                    "Cache hit"
                );
                return cached.into_response();
            }
            Err(e) => {
                metrics::record_lookup(&route.name, "error");
                warn!(route = %route.name, key = %key, error = %e, "Ignoring undecodable cache entry");
            }
        }
    } else {
        metrics::record_lookup(&route.name, "miss");
    }

    CacheCounters::incr(&counters.misses);
    debug!(route = %route.name, key = %key, "Cache miss");

    // Taken before the handler runs; an invalidation during it supersedes this entry
    let epoch = route.cache.writer().epoch();
    let response = next.run(request).await;
    capture(&route, key, epoch, response).await
}

/// Hand the response back, queueing a copy for the cache when it qualifies
async fn capture(route: &CachedRoute, key: String, epoch: u64, response: Response) -> Response {
    let status = response.status();

    if !route.policy.condition.allows(status) {
        debug!(route = %route.name, status = status.as_u16(), "Response not cacheable");
        return response;
    }

    if !storable(response.headers()) {
        metrics::record_write("skipped");
        debug!(route = %route.name, "Response headers forbid caching");
        return response;
    }

    let max_body_bytes = route.cache.max_body_bytes();
    match response.body().size_hint().upper() {
        Some(size) if size <= max_body_bytes as u64 => {}
        size => {
            metrics::record_write("skipped");
            debug!(
                route = %route.name,
                size = ?size,
                max_body_bytes,
                "Response too large or unsized, not caching"
            );
            return response;
        }
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_body(body, max_body_bytes).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::TooLarge(body) => {
            metrics::record_write("skipped");
            debug!(route = %route.name, max_body_bytes, "Body outgrew its size hint, not caching");
            return Response::from_parts(parts, body);
        }
        Buffered::Failed { body, error } => {
            metrics::record_write("skipped");
            warn!(route = %route.name, key = %key, error = %error, "Response body failed, not caching");
            return Response::from_parts(parts, body);
        }
    };

    let cached = CachedResponse::new(
        parts.status,
        parts.headers.get(header::CONTENT_TYPE),
        bytes.clone(),
    );
    match cached.encode() {
        Ok(payload) => route
            .cache
            .writer()
            .enqueue(key, payload, route.policy.ttl_secs, epoch),
        Err(e) => {
            metrics::record_write("error");
            warn!(route = %route.name, key = %key, error = %e, "Failed to encode response for cache");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

enum Buffered {
    Complete(Bytes),
    /// Over the limit; the body replays what was read, then the rest
    TooLarge(Body),
    /// The handler's body errored; the body replays what was read, then the error
    Failed { body: Body, error: String },
}

/// Read a body whole for the cache without losing anything the client should see
async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                size += chunk.len();
                chunks.push(chunk);
                if size > limit {
                    let read = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return Buffered::TooLarge(Body::from_stream(read.chain(data)));
                }
            }
            Err(e) => {
                let error = e.to_string();
                let replay = chunks
                    .into_iter()
                    .map(Ok::<_, axum::Error>)
                    .chain(std::iter::once(Err(e)));
                return Buffered::Failed {
                    body: Body::from_stream(stream::iter(replay)),
                    error,
                };
            }
        }
    }

    let mut bytes = BytesMut::with_capacity(size);
    for chunk in chunks {
        bytes.extend_from_slice(&chunk);
    }
    Buffered::Complete(bytes.freeze())
}

/// A hit replays status, content type and body only, so encoded bodies are not kept
fn storable(headers: &HeaderMap) -> bool {
    let no_store = headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"));

    !no_store && !headers.contains_key(header::CONTENT_ENCODING)
}

//! Request attributes that feed key derivation and invalidation

use crate::auth::AuthContext;
use axum::extract::{ConnectInfo, FromRequestParts, OriginalUri, RawPathParams, Request};
use axum::http::Method;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

/// Everything about a request that may distinguish one cached response from another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Full request path, including any prefix a nesting router stripped
    pub path: String,
    /// Query string with parameters stably sorted by name
    pub query: String,
    pub params: BTreeMap<String, String>,
    pub user_id: Option<String>,
    pub client_ip: Option<IpAddr>,
}

impl RequestContext {
    /// Read the context off a request, handing the request back untouched
    pub async fn extract(request: Request) -> (Request, Self) {
        let (mut parts, body) = request.into_parts();

        let params = RawPathParams::from_request_parts(&mut parts, &())
            .await
            .map(|raw| {
                raw.iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri)
            .unwrap_or(&parts.uri);
        let path = uri.path().to_string();
        let query = normalize_query(uri.query().unwrap_or(""));

        let auth = parts.extensions.get::<AuthContext>();
        let user_id = auth.and_then(|ctx| ctx.user_id.clone());
        let client_ip = auth.map(|ctx| ctx.client_ip).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });

        let context = Self {
            method: parts.method.clone(),
            path,
            query,
            params,
            user_id,
            client_ip,
        };

        (Request::from_parts(parts, body), context)
    }

    /// Key segment identifying who is asking
    ///
    /// Authenticated users are scoped by id. Anonymous callers get a `~`
    /// scope (by IP when known) that no encoded user id can produce.
    pub fn scope(&self) -> String {
        match (&self.user_id, self.client_ip) {
            (Some(user_id), _) => encode_segment(user_id).into_owned(),
            (None, Some(ip)) => format!("~ip-{}", encode_segment(&ip.to_string())),
            (None, None) => "~anon".to_string(),
        }
    }

    /// Path parameter, encoded for use inside a key
    pub fn param(&self, name: &str) -> Option<String> {
        self.params
            .get(name)
            .map(|value| encode_segment(value).into_owned())
    }

    /// `?`-prefixed normalized query, or empty
    pub fn query_suffix(&self) -> String {
        if self.query.is_empty() {
            String::new()
        } else {
            format!("?{}", self.query)
        }
    }
}

/// Sort query pairs by name so parameter order does not split cache entries
///
/// The sort is stable, so repeated parameters keep their relative order.
/// Values are left encoded as sent.
pub fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    pairs.sort_by_key(|pair| pair.split_once('=').map_or(*pair, |(name, _)| name));
    pairs.join("&")
}

/// Percent-encode the characters that structure keys (`:`, `~`, `%`)
pub fn encode_segment(value: &str) -> Cow<'_, str> {
    if !value.contains([':', '~', '%']) {
        return Cow::Borrowed(value);
    }

    let mut encoded = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            ':' => encoded.push_str("%3A"),
            '~' => encoded.push_str("%7E"),
            '%' => encoded.push_str("%25"),
            c => encoded.push(c),
        }
    }
    Cow::Owned(encoded)
}

#[cfg(test)]
pub(crate) fn test_context(
    path: &str,
    query: &str,
    params: &[(&str, &str)],
    user_id: Option<&str>,
) -> RequestContext {
    RequestContext {
        method: Method::GET,
        path: path.to_string(),
        query: normalize_query(query),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        user_id: user_id.map(str::to_string),
        client_ip: None,
    }
}

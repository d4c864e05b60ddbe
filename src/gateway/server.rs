//! # Proxy Server
//!
//! The axum handler every proxied request goes through. For one request:
//!
//! 1. Blacklist check against the current snapshot (403 when blocked)
//! 2. Route lookup in the current route table (404 when nothing matches)
//! 3. `RequestRateLimiter` token bucket; a breach blacklists the client (429)
//! 4. Request filters rewrite path and headers
//! 5. The route URI is resolved to an upstream and the request is forwarded
//! 6. Response filters run on the upstream's headers
//!
//! Rejections are answered with the error envelope of the matching `GatewayError`.
//! Downstream and internal failures go through the fallback responder.
//!
//! ## Rust Concepts Used
//!
//! - `State<GatewayState>` clones a handful of `Arc`s per request
//! - The route table and blacklist are snapshots (`Arc`) taken once per request
//! - `ConnectInfo<SocketAddr>` is read from request extensions when the listener exposes it

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, warn};

use crate::blacklist::BlacklistEvaluator;
use crate::core::error::{FieldError, GatewayError, GatewayResult};
use crate::core::fallback::fallback_response;
use crate::core::types::IncomingRequest;
use crate::gateway::upstream::UpstreamResolver;
use crate::middleware::rate_limiting::RateLimiter;
use crate::observability::metrics;
use crate::routing::{ForwardRequest, RouteCache};

/// Headers that describe one hop and are never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared state of the proxy listener
#[derive(Clone)]
pub struct GatewayState {
    pub routes: Arc<RouteCache>,
    pub blacklist: Arc<BlacklistEvaluator>,
    /// When false blacklist rules are not checked; rate limit breaches still create them
    pub check_blacklist: bool,
    pub rate_limiter: Arc<RateLimiter>,
    pub upstreams: Arc<UpstreamResolver>,
    pub http: reqwest::Client,
    pub upstream_timeout: Duration,
    pub max_request_size: usize,
}

/// Router that proxies every path
pub fn proxy_router(state: GatewayState) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip_all, fields(request_id, method, path))]
async fn handle_request(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let body = match axum::body::to_bytes(body, state.max_request_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return GatewayError::validation(vec![FieldError::new(
                "body",
                format!("unreadable or larger than {} bytes", state.max_request_size),
            )])
            .into_response();
        }
    };

    let request = IncomingRequest::new(parts.method, parts.uri, parts.headers, body, remote_addr);
    tracing::Span::current()
        .record("request_id", request.id.as_str())
        .record("method", request.method.as_str())
        .record("path", request.path());

    match proxy(&state, &request).await {
        Ok(response) => response,
        Err(e) if e.is_downstream_failure() || e.status_code() == StatusCode::INTERNAL_SERVER_ERROR => {
            fallback_response(&request.uri.to_string(), &e)
        }
        Err(e) => {
            debug!(request_id = %request.id, error = %e, "Request rejected");
            e.into_response()
        }
    }
}

async fn proxy(state: &GatewayState, request: &IncomingRequest) -> GatewayResult<Response> {
    if state.check_blacklist && state.blacklist.valid(request).await? {
        return Err(state.blacklist.rejection(request));
    }

    let table = state.routes.snapshot();
    let matched = table
        .match_route(request)
        .ok_or_else(|| GatewayError::RouteNotFound {
            path: request.path().to_string(),
        })?;
    let route = matched.route;

    if let Some((spec, trigger)) = route.rate_limit() {
        let client = request
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let decision = state
            .rate_limiter
            .try_acquire(&format!("{}:{}", route.id, client), spec);

        if !decision.allowed {
            metrics::record_rate_limited(&route.id);
            warn!(request_id = %request.id, route = %route.id, client = %client, "Rate limit exceeded");
            if let Err(e) = state.blacklist.set_black(request, trigger).await {
                warn!(request_id = %request.id, error = %e, "Failed to blacklist rate limited client");
            }
            return Err(GatewayError::RateLimitExceeded {
                route: route.id.clone(),
            });
        }
    }

    let mut forward = ForwardRequest {
        path: request.path().to_string(),
        query: request.query().map(str::to_string),
        headers: request.headers.clone(),
    };
    for filter in &route.filters {
        filter.apply_request(&mut forward, &matched.path_vars);
    }

    let base = state.upstreams.resolve(route.uri())?;
    let url = UpstreamResolver::target_url(&base, &forward.path, forward.query.as_deref());
    debug!(request_id = %request.id, route = %route.id, target = %url, "Forwarding request");

    let mut response = forward_request(state, request, &forward, &url).await?;
    for filter in &route.filters {
        filter.apply_response(response.headers_mut());
    }
    Ok(response)
}

/// Send the rewritten request upstream and stream the answer back
///
/// `reqwest` speaks `http` 0.2 types, so method, headers and status cross over by value.
async fn forward_request(
    state: &GatewayState,
    request: &IncomingRequest,
    forward: &ForwardRequest,
    url: &str,
) -> GatewayResult<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|e| GatewayError::internal(format!("unsupported method {}: {}", request.method, e)))?;

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in forward.headers.iter() {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    if let Some(ip) = request.client_ip() {
        let forwarded_for = match request.header(X_FORWARDED_FOR) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    let upstream = state
        .http
        .request(method, url)
        .headers(headers)
        .body(request.body.clone())
        .timeout(state.upstream_timeout)
        .send()
        .await
        .map_err(|e| upstream_error(e, url, state.upstream_timeout))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| GatewayError::internal(format!("invalid upstream status: {}", e)))?;

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            if !HOP_BY_HOP.contains(&name) {
                response_headers.append(name, value);
            }
        }
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn upstream_error(error: reqwest::Error, url: &str, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        GatewayError::service_unavailable(url, error.to_string())
    } else {
        GatewayError::from(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::BlacklistCache;
    use crate::core::events::EventBus;
    use crate::routing::source::RedisRouteSource;
    use crate::rules::{BlacklistRule, PredicateDefinition, RouteRule, RuleStore};
    use crate::storage::InMemoryHashStore;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct Fixture {
        store: RuleStore,
        cache: Arc<BlacklistCache>,
        state: GatewayState,
    }

    fn fixture(routes: Vec<RouteRule>) -> Fixture {
        let store = RuleStore::new(Arc::new(InMemoryHashStore::new()), "gateway:");
        let events = Arc::new(EventBus::new(16));
        let cache = Arc::new(BlacklistCache::new());
        let source = Arc::new(RedisRouteSource::new(store.clone(), events.clone()));

        let state = GatewayState {
            routes: Arc::new(RouteCache::new(source, routes)),
            blacklist: Arc::new(BlacklistEvaluator::new(store.clone(), cache.clone(), events)),
            check_blacklist: true,
            rate_limiter: Arc::new(RateLimiter::new()),
            upstreams: Arc::new(UpstreamResolver::new(&HashMap::new())),
            http: reqwest::Client::new(),
            upstream_timeout: Duration::from_secs(2),
            max_request_size: 1024,
        };
        Fixture { store, cache, state }
    }

    fn request(path: &str) -> Request {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("10.0.0.9:40000".parse::<SocketAddr>().unwrap()));
        request
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unmatched_path_is_404_envelope() {
        let fixture = fixture(Vec::new());
        let response = proxy_router(fixture.state).oneshot(request("/nowhere")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["messageId"], 40400);
        assert_eq!(body["successful"], false);
    }

    #[tokio::test]
    async fn test_blacklisted_client_gets_403_and_visit_is_counted() {
        let fixture = fixture(Vec::new());
        let stored = fixture
            .store
            .put(BlacklistRule {
                ip: "10.0.0.9".into(),
                path: "/admin/**".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        fixture.cache.reload(&fixture.store).await.unwrap();

        let response = proxy_router(fixture.state).oneshot(request("/admin/users")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let id = stored.id.unwrap();
        let rule: BlacklistRule = fixture.store.get(&id).await.unwrap().unwrap();
        assert_eq!(rule.visits, 1);
    }

    #[tokio::test]
    async fn test_unknown_lb_service_falls_back_with_503() {
        let fixture = fixture(vec![RouteRule {
            id: Some("r1".into()),
            name: "svc-a".into(),
            uri: "lb://svc-a".into(),
            predicates: vec![PredicateDefinition::new("Path", vec!["/a/**".into()])],
            ..Default::default()
        }]);

        let response = proxy_router(fixture.state).oneshot(request("/a/foo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["code"], 503);
        assert_eq!(body["messageId"], 50300);
    }
}

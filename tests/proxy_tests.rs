//! Integration tests for the proxy path
//!
//! Upstreams are wiremock servers; requests go through the proxy router with a
//! `ConnectInfo` extension standing in for the client socket.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dynamic_gateway::core::config::{GatewayConfig, UpstreamConfig};
use dynamic_gateway::rules::{FilterArg, FilterDefinition, PredicateDefinition};
use dynamic_gateway::storage::InMemoryHashStore;
use dynamic_gateway::{BlacklistRule, Gateway, RouteRule};

const CLIENT: &str = "192.168.1.20:51000";

fn route(id: &str, uri: &str, pattern: &str, filters: Vec<FilterDefinition>) -> RouteRule {
    RouteRule {
        id: Some(id.into()),
        name: id.into(),
        uri: uri.into(),
        predicates: vec![PredicateDefinition::new("Path", vec![pattern.into()])],
        filters,
        dynamic: false,
        ..Default::default()
    }
}

fn gateway(config: GatewayConfig) -> Gateway {
    Gateway::with_store(config, Arc::new(InMemoryHashStore::new())).unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    let mut request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(CLIENT.parse::<SocketAddr>().unwrap()));
    request
}

async fn send(gateway: &Gateway, request: Request<Body>) -> Response {
    gateway.proxy_router().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_forwards_with_filters_applied() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/7"))
        .and(header("x-gateway", "dynamic"))
        .and(header("x-forwarded-for", "192.168.1.20"))
        .respond_with(ResponseTemplate::new(200).set_body_string("order 7"))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.routes.push(route(
        "orders",
        &upstream.uri(),
        "/api/**",
        vec![
            FilterDefinition::new("StripPrefix", vec![FilterArg::new("parts", "1")]),
            FilterDefinition::new(
                "AddRequestHeader",
                vec![FilterArg::new("name", "X-Gateway"), FilterArg::new("value", "dynamic")],
            ),
            FilterDefinition::new(
                "AddResponseHeader",
                vec![FilterArg::new("name", "X-Served-By"), FilterArg::new("value", "gateway")],
            ),
        ],
    ));
    let gateway = gateway(config);

    let response = send(&gateway, request("GET", "/api/orders/7")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-served-by"], "gateway");
    assert_eq!(body_text(response).await, "order 7");
}

#[tokio::test]
async fn test_lb_route_resolves_configured_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(path("/a/foo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("svc-a"))
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.upstreams.insert(
        "svc-a".into(),
        UpstreamConfig {
            endpoints: vec![upstream.uri()],
        },
    );
    let gateway = gateway(config);

    // Dynamic route, visible after a reload
    gateway
        .routes()
        .source()
        .save(route("r1", "lb://svc-a", "/a/**", Vec::new()))
        .await
        .unwrap();
    gateway.routes().reload().await.unwrap();

    let response = send(&gateway, request("GET", "/a/foo")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "svc-a");
}

#[tokio::test]
async fn test_lower_order_wins() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    Mock::given(path("/shared/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("first"))
        .mount(&first)
        .await;
    Mock::given(path("/shared/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("second"))
        .mount(&second)
        .await;

    let mut config = GatewayConfig::default();
    let mut late = route("a-late", &second.uri(), "/shared/**", Vec::new());
    late.order = 10;
    let mut early = route("z-early", &first.uri(), "/shared/**", Vec::new());
    early.order = -1;
    config.routes = vec![late, early];
    let gateway = gateway(config);

    let response = send(&gateway, request("GET", "/shared/x")).await;
    assert_eq!(body_text(response).await, "first");
}

#[tokio::test]
async fn test_rate_limit_breach_blacklists_client() {
    let upstream = MockServer::start().await;
    Mock::given(path("/limited/x"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.routes.push(route(
        "limited",
        &upstream.uri(),
        "/limited/**",
        vec![FilterDefinition::new(
            "RequestRateLimiter",
            vec![
                FilterArg::new("replenishRate", "0.001"),
                FilterArg::new("burstCapacity", "1"),
            ],
        )],
    ));
    let gateway = gateway(config);

    assert_eq!(send(&gateway, request("GET", "/limited/x")).await.status(), StatusCode::OK);

    let response = send(&gateway, request("GET", "/limited/x")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let envelope: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(envelope["messageId"], 42900);

    let rules: Vec<BlacklistRule> = gateway.store().list().await.unwrap();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.ip, "192.168.1.20");
    assert_eq!(rule.method, "GET");
    assert_eq!(rule.path, "/limited/x");
    assert!(rule.description.contains("limited"));
    assert_eq!(
        rule.end_time.unwrap() - rule.start_time.unwrap(),
        chrono::Duration::hours(1)
    );

    // Once the snapshot is reloaded the client is blocked before routing
    gateway.load_rules().await;
    let response = send(&gateway, request("GET", "/limited/x")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_repeated_breaches_store_one_rule() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.routes.push(route(
        "limited",
        &upstream.uri(),
        "/limited/**",
        vec![FilterDefinition::new(
            "RequestRateLimiter",
            vec![
                FilterArg::new("replenishRate", "0.001"),
                FilterArg::new("burstCapacity", "1"),
            ],
        )],
    ));
    let gateway = gateway(config);
    let background = gateway.spawn_background();

    assert_eq!(send(&gateway, request("GET", "/limited/first")).await.status(), StatusCode::OK);

    let mut statuses = Vec::new();
    for n in 0..5 {
        let response = send(&gateway, request("GET", &format!("/limited/x{}", n))).await;
        statuses.push(response.status());
    }
    assert!(statuses
        .iter()
        .all(|status| *status == StatusCode::TOO_MANY_REQUESTS || *status == StatusCode::FORBIDDEN));

    let rules: Vec<BlacklistRule> = gateway.store().list().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].path, "/limited/x0");

    for task in background {
        task.abort();
    }
}

#[tokio::test]
async fn test_unreachable_upstream_gets_fallback_envelope() {
    let mut config = GatewayConfig::default();
    config.routes.push(route("dead", "http://127.0.0.1:1", "/dead/**", Vec::new()));
    let gateway = gateway(config);

    let response = send(&gateway, request("GET", "/dead/x")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let envelope: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(envelope["code"], 503);
    assert_eq!(envelope["successful"], false);
    assert!(envelope["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let upstream = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(2)))
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.server.upstream_timeout = std::time::Duration::from_millis(200);
    config.routes.push(route("slow", &upstream.uri(), "/slow", Vec::new()));
    let gateway = gateway(config);

    let response = send(&gateway, request("GET", "/slow")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let envelope: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(envelope["messageId"], 50301);
}

#[tokio::test]
async fn test_blacklist_disabled_skips_checks() {
    let upstream = MockServer::start().await;
    Mock::given(path("/open"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.blacklist.enabled = false;
    config.routes.push(route("open", &upstream.uri(), "/open", Vec::new()));
    let gateway = gateway(config);

    gateway
        .store()
        .put(BlacklistRule {
            path: "/open".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    gateway.load_rules().await;

    let response = send(&gateway, request("GET", "/open")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

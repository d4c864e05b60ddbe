//! Integration tests for the Nacos route source against a mock Nacos server

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dynamic_gateway::core::events::{EventBus, RuleEvent};
use dynamic_gateway::routing::{NacosClient, NacosConfig, NacosRouteSource, RouteDefinitionSource};
use dynamic_gateway::rules::PredicateDefinition;
use dynamic_gateway::RouteRule;

const CONFIG_PATH: &str = "/nacos/v1/cs/configs";

fn config(server: &MockServer) -> NacosConfig {
    NacosConfig {
        server_addr: server.uri(),
        data_id: "gateway-routes".into(),
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn source(config: NacosConfig) -> (Arc<NacosRouteSource>, Arc<EventBus>) {
    let events = Arc::new(EventBus::new(16));
    let client = Arc::new(NacosClient::new(config).unwrap());
    (Arc::new(NacosRouteSource::new(client, events.clone())), events)
}

fn routes_json() -> String {
    json!([
        {
            "id": "r2", "name": "svc-b", "uri": "lb://svc-b",
            "predicates": [{"name": "Path", "args": ["/b/**"]}],
            "createTime": "2024-02-01T00:00:00Z"
        },
        {
            "id": "r1", "name": "svc-a", "uri": "lb://svc-a",
            "predicates": [{"name": "Path", "args": ["/a/**"]}],
            "createTime": "2024-01-01T00:00:00Z"
        }
    ])
    .to_string()
}

#[tokio::test]
async fn test_list_reads_entry_in_creation_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .and(query_param("dataId", "gateway-routes"))
        .and(query_param("group", "DEFAULT_GROUP"))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .mount(&server)
        .await;

    let (source, _) = source(config(&server));
    let routes = source.list().await.unwrap();
    let ids: Vec<&str> = routes.iter().filter_map(|route| route.id.as_deref()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);

    let route = source.get("r2").await.unwrap().unwrap();
    assert_eq!(route.uri, "lb://svc-b");
    assert!(source.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_entry_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("config data not exist"))
        .mount(&server)
        .await;

    let (source, _) = source(config(&server));
    assert!(source.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_server_error_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (source, _) = source(config(&server));
    let err = source.list().await.unwrap_err();
    assert!(err.is_downstream_failure());
}

#[tokio::test]
async fn test_save_publishes_whole_array_and_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CONFIG_PATH))
        .and(body_string_contains("dataId=gateway-routes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let (source, events) = source(config(&server));
    let mut rx = events.subscribe();

    let saved = source
        .save(RouteRule {
            name: "svc-c".into(),
            uri: "lb://svc-c".into(),
            predicates: vec![PredicateDefinition::new("Path", vec!["/c/**".into()])],
            ..Default::default()
        })
        .await
        .unwrap();
    let id = saved.id.clone().unwrap();
    assert!(saved.dynamic);
    assert!(saved.create_time.is_some());
    assert_eq!(rx.recv().await.unwrap(), RuleEvent::RoutesChanged);

    let requests = server.received_requests().await.unwrap();
    let publish = requests
        .iter()
        .find(|request| request.method.to_string() == "POST")
        .unwrap();
    let form: Vec<(String, String)> = url::form_urlencoded::parse(&publish.body)
        .into_owned()
        .collect();
    let content = form
        .iter()
        .find(|(key, _)| key == "content")
        .map(|(_, value)| value.clone())
        .unwrap();
    let published: Vec<Value> = serde_json::from_str(&content).unwrap();
    assert_eq!(published.len(), 3);
    assert!(published.iter().any(|route| route["id"] == id.as_str()));
}

#[tokio::test]
async fn test_delete_unknown_id_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(0)
        .mount(&server)
        .await;

    let (source, _) = source(config(&server));
    assert!(!source.delete("nope").await.unwrap());
}

#[tokio::test]
async fn test_rejected_publish_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .mount(&server)
        .await;

    let (source, _) = source(config(&server));
    assert!(source.delete("r1").await.is_err());
}

#[tokio::test]
async fn test_login_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/nacos/v1/auth/login"))
        .and(body_string_contains("username=nacos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "tok-1",
            "tokenTtl": 18000,
            "globalAdmin": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .and(query_param("accessToken", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .expect(2)
        .mount(&server)
        .await;

    let (source, _) = source(NacosConfig {
        username: Some("nacos".into()),
        password: Some("nacos".into()),
        ..config(&server)
    });
    assert_eq!(source.list().await.unwrap().len(), 2);
    assert_eq!(source.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_watcher_publishes_on_content_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let (source, events) = source(config(&server));
    let mut rx = events.subscribe();
    let watcher = source.spawn_watcher();

    // Unchanged content publishes nothing
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(routes_json()))
        .mount(&server)
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RuleEvent::RoutesChanged);
    watcher.abort();
}

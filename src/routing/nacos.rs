//! # Nacos Route Source
//!
//! Routes stored as a JSON array inside a single Nacos config entry, addressed by
//! `(namespace, group, dataId)`. Uses the Nacos v1 open API:
//!
//! - `GET  /nacos/v1/cs/configs`: read the entry (404 when it does not exist)
//! - `POST /nacos/v1/cs/configs`: publish new content
//! - `POST /nacos/v1/auth/login`: exchange credentials for an access token
//!
//! Writes are read-modify-write of the whole array, serialized inside this process
//! by a mutex. Changes made elsewhere (the Nacos console, another gateway) are picked
//! up by [`NacosRouteSource::spawn_watcher`], which polls the entry and publishes
//! `RoutesChanged` when its content changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::RouteDefinitionSource;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::events::{EventBus, RuleEvent};
use crate::rules::{assign_identity, RouteRule};

const CONFIG_PATH: &str = "/nacos/v1/cs/configs";
const LOGIN_PATH: &str = "/nacos/v1/auth/login";

/// Refresh the access token this long before Nacos says it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Nacos connection and entry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosConfig {
    /// Base URL, e.g. `http://127.0.0.1:8848`
    pub server_addr: String,

    /// Namespace id (`tenant`); empty is the public namespace
    pub namespace: String,

    pub group: String,

    pub data_id: String,

    /// Credentials; login is skipped when no username is set
    pub username: Option<String>,
    pub password: Option<String>,

    /// Watcher poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NacosConfig {
    fn default() -> Self {
        Self {
            server_addr: "http://127.0.0.1:8848".to_string(),
            namespace: String::new(),
            group: "DEFAULT_GROUP".to_string(),
            data_id: "gateway-routes".to_string(),
            username: None,
            password: None,
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    /// Seconds
    token_ttl: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Minimal client for the Nacos config API
pub struct NacosClient {
    config: NacosConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
}

impl NacosClient {
    pub fn new(config: NacosConfig) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::nacos(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NacosConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_addr.trim_end_matches('/'), path)
    }

    /// Access token for the next call, logging in when needed
    async fn access_token(&self) -> GatewayResult<Option<String>> {
        let username = match &self.config.username {
            Some(username) if !username.is_empty() => username,
            _ => return Ok(None),
        };

        let cached = self.token.lock().clone();
        if let Some(token) = cached {
            if Instant::now() < token.refresh_at {
                return Ok(Some(token.value));
            }
        }

        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .form(&[
                ("username", username.as_str()),
                ("password", self.config.password.as_deref().unwrap_or("")),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::nacos(format!("login request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::nacos(format!("login rejected with status {}", response.status())));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::nacos(format!("unreadable login response: {}", e)))?;

        let ttl = Duration::from_secs(login.token_ttl).saturating_sub(TOKEN_REFRESH_MARGIN);
        *self.token.lock() = Some(CachedToken {
            value: login.access_token.clone(),
            refresh_at: Instant::now() + ttl,
        });
        debug!(ttl_secs = login.token_ttl, "Logged in to Nacos");

        Ok(Some(login.access_token))
    }

    fn entry_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("dataId", self.config.data_id.clone()),
            ("group", self.config.group.clone()),
        ];
        if !self.config.namespace.is_empty() {
            params.push(("tenant", self.config.namespace.clone()));
        }
        params
    }

    /// Current content of the entry, `None` when it does not exist
    pub async fn get_config(&self) -> GatewayResult<Option<String>> {
        let mut params = self.entry_params();
        if let Some(token) = self.access_token().await? {
            params.push(("accessToken", token));
        }

        let response = self
            .http
            .get(self.url(CONFIG_PATH))
            .query(&params)
            .send()
            .await
            .map_err(|e| GatewayError::nacos(format!("config read failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::nacos(format!("config read failed: {}", e)))?;
                Ok(Some(body))
            }
            status => Err(GatewayError::nacos(format!("config read returned status {}", status))),
        }
    }

    /// Replace the entry's content
    pub async fn publish_config(&self, content: &str) -> GatewayResult<()> {
        let mut params = self.entry_params();
        params.push(("content", content.to_string()));
        params.push(("type", "json".to_string()));
        if let Some(token) = self.access_token().await? {
            params.push(("accessToken", token));
        }

        let response = self
            .http
            .post(self.url(CONFIG_PATH))
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::nacos(format!("config publish failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "true" {
            return Err(GatewayError::nacos(format!(
                "config publish rejected (status {}, body '{}')",
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}

/// Parse entry content; empty content is an empty route list
fn parse_routes(content: Option<&str>) -> GatewayResult<Vec<RouteRule>> {
    match content.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(content) => serde_json::from_str(content)
            .map_err(|e| GatewayError::nacos(format!("route entry is not a JSON route array: {}", e))),
    }
}

/// Routes kept in a Nacos config entry
pub struct NacosRouteSource {
    client: Arc<NacosClient>,
    events: Arc<EventBus>,
    write_lock: tokio::sync::Mutex<()>,
}

impl NacosRouteSource {
    pub fn new(client: Arc<NacosClient>, events: Arc<EventBus>) -> Self {
        Self {
            client,
            events,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn write(&self, routes: &[RouteRule]) -> GatewayResult<()> {
        let content = serde_json::to_string_pretty(routes)?;
        self.client.publish_config(&content).await?;
        self.events.publish(RuleEvent::RoutesChanged).await;
        Ok(())
    }

    /// Poll the entry and publish `RoutesChanged` whenever its content changes
    ///
    /// The first successful read only records the content; startup loads routes
    /// separately.
    pub fn spawn_watcher(&self) -> JoinHandle<()> {
        let client = self.client.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(client.config().poll_interval);
            let mut last_seen: Option<Option<String>> = None;
            info!(
                data_id = %client.config().data_id,
                group = %client.config().group,
                "Watching Nacos route entry"
            );

            loop {
                interval.tick().await;
                match client.get_config().await {
                    Ok(content) => {
                        let changed = last_seen.as_ref().map(|seen| *seen != content).unwrap_or(false);
                        if changed {
                            info!(data_id = %client.config().data_id, "Nacos route entry changed");
                            events.publish(RuleEvent::RoutesChanged).await;
                        }
                        last_seen = Some(content);
                    }
                    Err(e) => warn!(error = %e, "Polling Nacos route entry failed"),
                }
            }
        })
    }
}

#[async_trait]
impl RouteDefinitionSource for NacosRouteSource {
    fn kind(&self) -> &'static str {
        "nacos"
    }

    async fn list(&self) -> GatewayResult<Vec<RouteRule>> {
        let content = self.client.get_config().await?;
        let mut routes = parse_routes(content.as_deref())?;
        routes.sort_by(|a, b| a.create_time.cmp(&b.create_time).then_with(|| a.id.cmp(&b.id)));
        Ok(routes)
    }

    async fn save(&self, mut route: RouteRule) -> GatewayResult<RouteRule> {
        let _guard = self.write_lock.lock().await;

        route.dynamic = true;
        let id = assign_identity(&mut route);

        let mut routes = parse_routes(self.client.get_config().await?.as_deref())?;
        match routes.iter_mut().find(|existing| existing.id.as_deref() == Some(id.as_str())) {
            Some(existing) => *existing = route.clone(),
            None => routes.push(route.clone()),
        }

        self.write(&routes).await?;
        Ok(route)
    }

    async fn delete(&self, id: &str) -> GatewayResult<bool> {
        let _guard = self.write_lock.lock().await;

        let mut routes = parse_routes(self.client.get_config().await?.as_deref())?;
        let before = routes.len();
        routes.retain(|route| route.id.as_deref() != Some(id));
        if routes.len() == before {
            return Ok(false);
        }

        self.write(&routes).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert!(parse_routes(None).unwrap().is_empty());
        assert!(parse_routes(Some("  ")).unwrap().is_empty());
        assert!(parse_routes(Some("{\"not\": \"a list\"}")).is_err());

        let routes = parse_routes(Some(
            r#"[{"id":"r1","name":"svc-a","uri":"lb://svc-a","predicates":[{"name":"Path","args":["/a/**"]}]}]"#,
        ))
        .unwrap();
        assert_eq!(routes[0].id.as_deref(), Some("r1"));
        assert!(routes[0].dynamic);
    }

    #[test]
    fn test_entry_params_skip_empty_namespace() {
        let client = NacosClient::new(NacosConfig::default()).unwrap();
        let keys: Vec<&str> = client.entry_params().iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec!["dataId", "group"]);

        let client = NacosClient::new(NacosConfig {
            namespace: "dev".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.entry_params().len(), 3);
    }
}

//! # Configuration Module
//!
//! The gateway's configuration structures and how they are loaded.
//!
//! ## Key Features
//! - YAML or JSON parsing with serde, chosen by file extension
//! - Defaults for every field, so a missing file still yields a runnable gateway
//! - `GATEWAY_*` environment variable overrides
//! - Validation that reports every problem at once
//!
//! ## Example
//!
//! ```yaml
//! server:
//!   port: 8080
//!   upstream_timeout: 30s
//! redis:
//!   url: redis://localhost:6379
//! route_source:
//!   kind: nacos
//!   nacos:
//!     server_addr: http://127.0.0.1:8848
//!     data_id: gateway-routes
//! upstreams:
//!   svc-a:
//!     endpoints: [http://10.0.0.5:9000, http://10.0.0.6:9000]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::logging::{LogFormat, LoggingConfig};
use crate::observability::metrics::MetricsConfig;
use crate::routing::nacos::NacosConfig;
use crate::rules::{Rule, RouteRule};
use crate::storage::RedisStoreConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";

/// Config file used when `GATEWAY_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener
    pub server: ServerConfig,

    /// Admin API listener
    pub admin: AdminConfig,

    /// Rule storage and pub/sub
    pub redis: RedisStoreConfig,

    /// Where dynamic routes are stored
    pub route_source: RouteSourceConfig,

    pub blacklist: BlacklistConfig,

    pub event_bus: EventBusConfig,

    /// Named upstream groups that `lb://name` routes resolve to
    pub upstreams: HashMap<String, UpstreamConfig>,

    /// Routes that are always present and cannot be changed at runtime
    pub routes: Vec<RouteRule>,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,
}

impl GatewayConfig {
    /// Load from `GATEWAY_CONFIG_PATH`, or `config/gateway.yaml`
    pub async fn from_env() -> GatewayResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_or_default(path).await
    }

    /// Load a file, falling back to defaults when it does not exist
    ///
    /// Environment overrides and validation apply either way.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let mut config = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::parse_file(path).await?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML or JSON file (by extension), apply overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let mut config = Self::parse_file(path.as_ref()).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    async fn parse_file(path: &Path) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Apply `GATEWAY_<SECTION>_<FIELD>` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(port) = lookup("GATEWAY_SERVER_PORT") {
            self.server.port = parse_var("GATEWAY_SERVER_PORT", &port)?;
        }
        if let Some(timeout) = lookup("GATEWAY_SERVER_UPSTREAM_TIMEOUT") {
            self.server.upstream_timeout = parse_duration_var("GATEWAY_SERVER_UPSTREAM_TIMEOUT", &timeout)?;
        }

        if let Some(addr) = lookup("GATEWAY_ADMIN_BIND_ADDRESS") {
            self.admin.bind_address = addr;
        }
        if let Some(port) = lookup("GATEWAY_ADMIN_PORT") {
            self.admin.port = parse_var("GATEWAY_ADMIN_PORT", &port)?;
        }
        if let Some(token) = lookup("GATEWAY_ADMIN_API_TOKEN") {
            self.admin.api_token = Some(token).filter(|token| !token.is_empty());
        }

        if let Some(enabled) = lookup("GATEWAY_REDIS_ENABLED") {
            self.redis.enabled = parse_var("GATEWAY_REDIS_ENABLED", &enabled)?;
        }
        if let Some(url) = lookup("GATEWAY_REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(prefix) = lookup("GATEWAY_REDIS_KEY_PREFIX") {
            self.redis.key_prefix = prefix;
        }

        if let Some(kind) = lookup("GATEWAY_ROUTE_SOURCE") {
            self.route_source.kind = parse_var("GATEWAY_ROUTE_SOURCE", &kind)?;
        }
        if let Some(addr) = lookup("GATEWAY_NACOS_SERVER_ADDR") {
            self.route_source.nacos.server_addr = addr;
        }
        if let Some(namespace) = lookup("GATEWAY_NACOS_NAMESPACE") {
            self.route_source.nacos.namespace = namespace;
        }
        if let Some(username) = lookup("GATEWAY_NACOS_USERNAME") {
            self.route_source.nacos.username = Some(username);
        }
        if let Some(password) = lookup("GATEWAY_NACOS_PASSWORD") {
            self.route_source.nacos.password = Some(password);
        }

        if let Some(duration) = lookup("GATEWAY_BLACKLIST_BLOCK_DURATION") {
            self.blacklist.block_duration = parse_duration_var("GATEWAY_BLACKLIST_BLOCK_DURATION", &duration)?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: '{}' (expected json or text)",
                        other
                    )))
                }
            };
        }

        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.metrics.enabled = parse_var("GATEWAY_METRICS_ENABLED", &enabled)?;
        }

        Ok(())
    }

    /// Configuration validation with every problem listed
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }
        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.server.upstream_timeout.is_zero() {
            errors.push("server.upstream_timeout must be greater than 0".to_string());
        }
        if self.server.max_request_size == 0 {
            errors.push("server.max_request_size must be greater than 0".to_string());
        }

        if self.admin.enabled {
            if self.admin.port == 0 {
                errors.push("admin.port must be greater than 0".to_string());
            }
            if self.admin.port == self.server.port && self.admin.bind_address == self.server.bind_address {
                errors.push("admin and server listeners cannot share an address".to_string());
            }
        }

        if self.redis.enabled {
            match Url::parse(&self.redis.url) {
                Ok(url) if matches!(url.scheme(), "redis" | "rediss") => {}
                Ok(url) => errors.push(format!("redis.url has unsupported scheme '{}'", url.scheme())),
                Err(e) => errors.push(format!("redis.url is invalid: {}", e)),
            }
        }

        if self.route_source.kind == RouteSourceKind::Nacos {
            let nacos = &self.route_source.nacos;
            match Url::parse(&nacos.server_addr) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "route_source.nacos.server_addr has unsupported scheme '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("route_source.nacos.server_addr is invalid: {}", e)),
            }
            if nacos.data_id.trim().is_empty() {
                errors.push("route_source.nacos.data_id cannot be empty".to_string());
            }
            if nacos.group.trim().is_empty() {
                errors.push("route_source.nacos.group cannot be empty".to_string());
            }
            if nacos.poll_interval.is_zero() {
                errors.push("route_source.nacos.poll_interval must be greater than 0".to_string());
            }
        }

        if self.blacklist.block_duration.is_zero() {
            errors.push("blacklist.block_duration must be greater than 0".to_string());
        }
        if self.event_bus.capacity == 0 {
            errors.push("event_bus.capacity must be greater than 0".to_string());
        }

        for (name, upstream) in &self.upstreams {
            if upstream.endpoints.is_empty() {
                errors.push(format!("Upstream '{}' has no endpoints", name));
            }
            for endpoint in &upstream.endpoints {
                match Url::parse(endpoint) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                    _ => errors.push(format!("Upstream '{}' has invalid endpoint '{}'", name, endpoint)),
                }
            }
        }

        for (index, route) in self.routes.iter().enumerate() {
            let label = route.id.clone().unwrap_or_else(|| format!("#{}", index));
            for error in route.validate() {
                errors.push(format!("Route '{}': {}", label, error));
            }
            if let Some(service) = route.uri.strip_prefix("lb://") {
                let service = service.split('/').next().unwrap_or(service);
                if !self.upstreams.contains_key(service) {
                    errors.push(format!("Route '{}' references unknown upstream '{}'", label, service));
                }
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Redis channel carrying rule change events
    pub fn event_channel(&self) -> String {
        format!("{}rule:events", self.redis.key_prefix)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> GatewayResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid {}: {}", name, e)))
}

fn parse_duration_var(name: &str, value: &str) -> GatewayResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| GatewayError::config(format!("Invalid {}: {}", name, e)))
}

/// Proxy listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,

    pub port: u16,

    /// Time allowed for one upstream call, including reading the response
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            upstream_timeout: Duration::from_secs(30),
            max_request_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Admin API listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    pub bind_address: String,

    pub port: u16,

    /// Bearer token required on `/admin/gateway/*`; open when unset
    pub api_token: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8081,
            api_token: None,
        }
    }
}

/// Route source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSourceKind {
    /// Routes in the rule store
    #[default]
    Redis,
    /// Routes in a Nacos config entry
    Nacos,
}

impl FromStr for RouteSourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "nacos" => Ok(Self::Nacos),
            other => Err(format!("unknown route source '{}' (expected redis or nacos)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSourceConfig {
    pub kind: RouteSourceKind,

    /// Used when `kind` is `nacos`
    pub nacos: NacosConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Check requests against blacklist rules
    pub enabled: bool,

    /// Lifetime of entries created when a rate limit is breached
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_duration: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Broadcast channel capacity; slower subscribers trigger a full reload
    pub capacity: usize,

    /// Bridge events over Redis pub/sub so other instances refresh too
    pub redis_bridge: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            redis_bridge: true,
        }
    }
}

/// Endpoints behind an `lb://` service name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URLs, e.g. `http://10.0.0.5:9000`
    pub endpoints: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::PredicateDefinition;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.blacklist.block_duration, Duration::from_secs(3600));
        assert_eq!(config.event_channel(), "gateway:rule:events");
        assert_eq!(config.route_source.kind, RouteSourceKind::Redis);
    }

    #[tokio::test]
    async fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
server:
  port: 9000
  upstream_timeout: 5s
redis:
  enabled: false
route_source:
  kind: nacos
  nacos:
    server_addr: http://nacos:8848
    data_id: routes.json
    poll_interval: 2s
blacklist:
  block_duration: 30m
upstreams:
  svc-a:
    endpoints: ["http://10.0.0.5:9000"]
routes:
  - id: static-a
    name: svc-a
    uri: lb://svc-a
    predicates:
      - name: Path
        args: ["/a/**"]
logging:
  level: debug
  format: text
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.upstream_timeout, Duration::from_secs(5));
        assert!(!config.redis.enabled);
        assert_eq!(config.route_source.kind, RouteSourceKind::Nacos);
        assert_eq!(config.route_source.nacos.data_id, "routes.json");
        assert_eq!(config.route_source.nacos.group, "DEFAULT_GROUP");
        assert_eq!(config.blacklist.block_duration, Duration::from_secs(1800));
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[tokio::test]
    async fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = GatewayConfig::parse_file(&path).await.unwrap();
        config.validate().unwrap();
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.upstreams["workflow-service"].endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"server": {{"port": 7000}}, "admin": {{"port": 7001}}}}"#).unwrap();

        let config = GatewayConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.admin.port, 7001);
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load_or_default(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(lookup(&[
                ("GATEWAY_SERVER_PORT", "9999"),
                ("GATEWAY_REDIS_URL", "redis://cache:6380"),
                ("GATEWAY_ROUTE_SOURCE", "NACOS"),
                ("GATEWAY_BLACKLIST_BLOCK_DURATION", "15m"),
                ("GATEWAY_LOG_FORMAT", "text"),
                ("GATEWAY_ADMIN_API_TOKEN", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.redis.url, "redis://cache:6380");
        assert_eq!(config.route_source.kind, RouteSourceKind::Nacos);
        assert_eq!(config.blacklist.block_duration, Duration::from_secs(900));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.admin.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_env_override_is_reported() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides(lookup(&[("GATEWAY_SERVER_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("GATEWAY_SERVER_PORT"));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        config.redis.url = "http://not-redis".into();
        config.blacklist.block_duration = Duration::ZERO;
        config.upstreams.insert("empty".into(), UpstreamConfig::default());
        config.routes.push(RouteRule {
            id: Some("s1".into()),
            name: "s1".into(),
            uri: "lb://missing".into(),
            predicates: vec![PredicateDefinition::new("Path", vec!["/s/**".into()])],
            dynamic: false,
            ..Default::default()
        });

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("server.port"));
        assert!(message.contains("redis.url"));
        assert!(message.contains("blacklist.block_duration"));
        assert!(message.contains("Upstream 'empty' has no endpoints"));
        assert!(message.contains("unknown upstream 'missing'"));
    }
}

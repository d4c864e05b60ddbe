//! # Gateway Assembly
//!
//! [`Gateway::build`] wires the components together from a [`GatewayConfig`]:
//!
//! - the hash store (Redis, or in-memory when `redis.enabled` is false)
//! - the event bus, bridged over Redis pub/sub when configured
//! - the route source (Redis or Nacos), route cache and blacklist evaluator
//! - the proxy and admin routers
//!
//! `load_rules` fills the caches once at startup and `spawn_background` starts the
//! tasks that keep them current.

pub mod refresher;
pub mod server;
pub mod upstream;

pub use refresher::RuleRefresher;
pub use server::{proxy_router, GatewayState};
pub use upstream::UpstreamResolver;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::admin::{AdminRouter, AdminState};
use crate::blacklist::{BlacklistCache, BlacklistEvaluator};
use crate::core::config::{GatewayConfig, RouteSourceKind};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::events::{spawn_redis_bridge, EventBus};
use crate::middleware::rate_limiting::RateLimiter;
use crate::routing::{NacosClient, NacosRouteSource, RedisRouteSource, RouteCache, RouteDefinitionSource};
use crate::rules::RuleStore;
use crate::storage::{HashStore, InMemoryHashStore, RedisHashStore};

/// How often idle rate limiter buckets are dropped
const BUCKET_EVICTION_INTERVAL: Duration = Duration::from_secs(300);

/// Every long-lived component of one gateway instance
pub struct Gateway {
    config: GatewayConfig,
    store: RuleStore,
    events: Arc<EventBus>,
    routes: Arc<RouteCache>,
    blacklist: Arc<BlacklistEvaluator>,
    rate_limiter: Arc<RateLimiter>,
    upstreams: Arc<UpstreamResolver>,
    http: reqwest::Client,
    metrics: Option<PrometheusHandle>,
    redis_bridge: Option<redis::Client>,
    nacos: Option<Arc<NacosRouteSource>>,
}

impl Gateway {
    /// Connect to Redis (when enabled) and assemble the gateway
    pub async fn build(config: GatewayConfig) -> GatewayResult<Self> {
        if !config.redis.enabled {
            info!("Redis disabled, rules are kept in memory and events stay local");
            let events = Arc::new(EventBus::new(config.event_bus.capacity));
            return Self::assemble(config, Arc::new(InMemoryHashStore::new()), events, None);
        }

        let redis = RedisHashStore::connect(&config.redis).await?;
        let (events, bridge) = if config.event_bus.redis_bridge {
            let bus = EventBus::with_redis(config.event_bus.capacity, redis.connection(), config.event_channel());
            (bus, Some(redis.client().clone()))
        } else {
            (EventBus::new(config.event_bus.capacity), None)
        };

        Self::assemble(config, Arc::new(redis), Arc::new(events), bridge)
    }

    /// Assemble around an existing store with a local event bus
    pub fn with_store(config: GatewayConfig, backend: Arc<dyn HashStore>) -> GatewayResult<Self> {
        let events = Arc::new(EventBus::new(config.event_bus.capacity));
        Self::assemble(config, backend, events, None)
    }

    fn assemble(
        config: GatewayConfig,
        backend: Arc<dyn HashStore>,
        events: Arc<EventBus>,
        redis_bridge: Option<redis::Client>,
    ) -> GatewayResult<Self> {
        let store = RuleStore::new(backend, config.redis.key_prefix.clone());

        let nacos = match config.route_source.kind {
            RouteSourceKind::Redis => None,
            RouteSourceKind::Nacos => {
                let client = Arc::new(NacosClient::new(config.route_source.nacos.clone())?);
                Some(Arc::new(NacosRouteSource::new(client, events.clone())))
            }
        };
        let source: Arc<dyn RouteDefinitionSource> = match &nacos {
            Some(nacos) => nacos.clone(),
            None => Arc::new(RedisRouteSource::new(store.clone(), events.clone())),
        };

        let routes = Arc::new(RouteCache::new(source, config.routes.clone()));
        let blacklist = Arc::new(
            BlacklistEvaluator::new(store.clone(), Arc::new(BlacklistCache::new()), events.clone())
                .with_block_duration(config.blacklist.block_duration),
        );
        let http = reqwest::Client::builder()
            .timeout(config.server.upstream_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;

        info!(
            route_source = routes.source().kind(),
            static_routes = config.routes.len(),
            upstreams = config.upstreams.len(),
            "Gateway assembled"
        );

        Ok(Self {
            upstreams: Arc::new(UpstreamResolver::new(&config.upstreams)),
            rate_limiter: Arc::new(RateLimiter::new()),
            config,
            store,
            events,
            routes,
            blacklist,
            http,
            metrics: None,
            redis_bridge,
            nacos,
        })
    }

    /// Serve `/metrics` from this recorder handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn routes(&self) -> &Arc<RouteCache> {
        &self.routes
    }

    pub fn blacklist(&self) -> &Arc<BlacklistEvaluator> {
        &self.blacklist
    }

    fn refresher(&self) -> RuleRefresher {
        RuleRefresher::new(self.routes.clone(), self.blacklist.cache().clone(), self.store.clone())
    }

    /// Initial fill of the route table and blacklist snapshot
    ///
    /// Failures are logged; the gateway starts with static routes and no blacklist.
    pub async fn load_rules(&self) {
        self.refresher().refresh_all().await;
    }

    /// Subscribe the background tasks, then load rules
    ///
    /// An event published while the initial load runs is handled by the refresher.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let tasks = self.spawn_background();
        self.load_rules().await;
        tasks
    }

    /// Start the refresher, the Redis bridge, the Nacos watcher and bucket eviction
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.refresher().spawn(&self.events)];

        if let Some(client) = &self.redis_bridge {
            tasks.push(spawn_redis_bridge(
                client.clone(),
                self.config.event_channel(),
                self.events.clone(),
            ));
        }

        if let Some(nacos) = &self.nacos {
            tasks.push(nacos.spawn_watcher());
        }

        let limiter = self.rate_limiter.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(BUCKET_EVICTION_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = limiter.evict_idle(BUCKET_EVICTION_INTERVAL);
                if evicted > 0 {
                    info!(evicted, "Evicted idle rate limiter buckets");
                }
            }
        }));

        tasks
    }

    pub fn proxy_router(&self) -> Router {
        if !self.config.blacklist.enabled {
            warn!("Blacklist checks disabled");
        }
        proxy_router(GatewayState {
            routes: self.routes.clone(),
            blacklist: self.blacklist.clone(),
            check_blacklist: self.config.blacklist.enabled,
            rate_limiter: self.rate_limiter.clone(),
            upstreams: self.upstreams.clone(),
            http: self.http.clone(),
            upstream_timeout: self.config.server.upstream_timeout,
            max_request_size: self.config.server.max_request_size,
        })
    }

    pub fn admin_router(&self) -> Router {
        AdminRouter::create_router(AdminState {
            store: self.store.clone(),
            routes: self.routes.clone(),
            blacklist: self.blacklist.cache().clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone().filter(|_| self.config.metrics.enabled),
            api_token: self.config.admin.api_token.as_deref().map(Arc::from),
        })
    }
}

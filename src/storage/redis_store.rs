//! # Redis Hash Store
//!
//! `ConnectionManager` multiplexes every call over one connection and reconnects on
//! its own, so the store holds a clone and never locks. Visit increments map to
//! `HINCRBY`, which Redis executes atomically no matter how many gateway instances
//! hit the same counter.

use super::{HashStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Use Redis; when false rules live in process memory and events stay local
    pub enabled: bool,

    /// Redis connection URL
    pub url: String,

    /// Prefix for every key the gateway writes
    pub key_prefix: String,

    /// How long to wait for the initial connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            key_prefix: "gateway:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Hash store backed by Redis
#[derive(Clone)]
pub struct RedisHashStore {
    client: Client,
    connection: ConnectionManager,
}

impl RedisHashStore {
    /// Connect to Redis
    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| StoreError::Backend {
                message: format!(
                    "timed out after {:?} connecting to {}",
                    config.connection_timeout, config.url
                ),
            })??;

        info!(url = %config.url, "Redis hash store connected");

        Ok(Self { client, connection })
    }

    /// The underlying client, for opening pub/sub connections
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A multiplexed connection handle, for publishing events
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        debug!(key = %key, field = %field, hit = value.is_some(), "HGET");
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.connection.clone();
        let values: HashMap<String, String> = conn.hgetall(key).await?;
        debug!(key = %key, fields = values.len(), "HGETALL");
        Ok(values)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        debug!(key = %key, field = %field, "HSET");
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.hdel(key, field).await?;
        debug!(key = %key, field = %field, removed, "HDEL");
        Ok(removed > 0)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

//! # Hash Stores
//!
//! The rule store only needs hash operations: field get/set/delete, whole-hash reads
//! and an atomic field increment. This module defines that capability as a trait
//! and provides two backends:
//!
//! - [`RedisHashStore`]: shared by every gateway instance; increments use `HINCRBY`
//! - [`InMemoryHashStore`]: single-process deployments and tests
//!
//! Neither backend retries. A failed call surfaces as [`StoreError`] and is converted
//! into `GatewayError::Store` on its way to the caller.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryHashStore;
pub use redis_store::{RedisHashStore, RedisStoreConfig};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::error::GatewayError;

/// Store operation result
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Stored value is not an integer: {value}")]
    NotAnInteger { value: String },

    #[error("Increment of {value} by {delta} would overflow")]
    Overflow { value: i64, delta: i64 },

    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::store(err.to_string())
    }
}

/// Hash operations the rule store is built on
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Read one field
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Read every field; an absent hash is an empty map
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Write one field, overwriting any previous value
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Remove one field; returns whether it existed
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer field, creating it at 0 first
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Connectivity check
    async fn health_check(&self) -> StoreResult<bool>;
}

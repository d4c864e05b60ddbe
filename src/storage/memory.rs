//! # In-Memory Hash Store
//!
//! `DashMap` keyed by hash name. Every operation on one hash holds that entry's shard
//! lock for its duration, which is what makes `hincr` atomic.

use super::{HashStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryHashStore {
    hashes: DashMap<String, HashMap<String, String>>,
}

impl InMemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HashStore for InMemoryHashStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.clone())
            .unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let removed = match self.hashes.get_mut(key) {
            Some(mut hash) => hash.remove(field).is_some(),
            None => false,
        };
        // Redis drops a hash once its last field is gone
        self.hashes.remove_if(key, |_, hash| hash.is_empty());
        Ok(removed)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger { value: value.clone() })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or(StoreError::Overflow { value: current, delta })?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

//! # Rule Store
//!
//! Generic get/list/put/delete over any [`Rule`] type, plus the visit counter used by
//! blacklist rules. Bodies live in `RuleType::hash_key`, counters in
//! `RuleType::visits_key`, both keyed by rule id.
//!
//! Failures from the backend are returned to the caller as `GatewayError::Store`;
//! nothing here retries.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{assign_identity, Rule, RuleType};
use crate::core::error::{GatewayError, GatewayResult};
use crate::storage::HashStore;

/// Rule persistence over a [`HashStore`]
#[derive(Clone)]
pub struct RuleStore {
    backend: Arc<dyn HashStore>,
    prefix: String,
}

impl RuleStore {
    pub fn new<S: Into<String>>(backend: Arc<dyn HashStore>, prefix: S) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &Arc<dyn HashStore> {
        &self.backend
    }

    /// Fetch one rule, `None` when the id is unknown
    pub async fn get<R: Rule>(&self, id: &str) -> GatewayResult<Option<R>> {
        let rule_type = R::RULE_TYPE;
        let raw = match self.backend.hget(&rule_type.hash_key(&self.prefix), id).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut rule: R = serde_json::from_str(&raw)?;

        if rule_type.tracks_visits() {
            let visits = self
                .backend
                .hget(&rule_type.visits_key(&self.prefix), id)
                .await?
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0);
            rule.set_visits(visits);
        }

        Ok(Some(rule))
    }

    /// Every rule of one type, ordered by creation time then id
    ///
    /// An absent hash yields an empty list. Entries that no longer deserialize are
    /// skipped with a warning so one bad value cannot take the whole type down.
    pub async fn list<R: Rule>(&self) -> GatewayResult<Vec<R>> {
        let rule_type = R::RULE_TYPE;
        let entries = self.backend.hgetall(&rule_type.hash_key(&self.prefix)).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let visits: HashMap<String, String> = if rule_type.tracks_visits() {
            self.backend.hgetall(&rule_type.visits_key(&self.prefix)).await?
        } else {
            HashMap::new()
        };

        let mut rules = Vec::with_capacity(entries.len());
        for (id, raw) in entries {
            match serde_json::from_str::<R>(&raw) {
                Ok(mut rule) => {
                    if rule_type.tracks_visits() {
                        let count = visits
                            .get(&id)
                            .and_then(|value| value.parse::<u64>().ok())
                            .unwrap_or(0);
                        rule.set_visits(count);
                    }
                    rules.push(rule);
                }
                Err(e) => {
                    warn!(rule_type = rule_type.name(), id = %id, error = %e, "Skipping unreadable rule");
                }
            }
        }

        rules.sort_by(|a, b| {
            a.create_time()
                .cmp(&b.create_time())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(rules)
    }

    /// Insert or overwrite a rule
    ///
    /// Missing id and createTime are filled in; the stored rule is returned.
    pub async fn put<R: Rule>(&self, mut rule: R) -> GatewayResult<R> {
        let rule_type = R::RULE_TYPE;

        let id = assign_identity(&mut rule);
        let raw = serde_json::to_string(&rule)?;
        self.backend
            .hset(&rule_type.hash_key(&self.prefix), &id, &raw)
            .await?;

        debug!(rule_type = rule_type.name(), id = %id, "Stored rule");
        Ok(rule)
    }

    /// Remove a rule and its counter; returns whether the rule existed
    pub async fn delete(&self, rule_type: RuleType, id: &str) -> GatewayResult<bool> {
        let removed = self.backend.hdel(&rule_type.hash_key(&self.prefix), id).await?;
        if rule_type.tracks_visits() {
            self.backend.hdel(&rule_type.visits_key(&self.prefix), id).await?;
        }

        debug!(rule_type = rule_type.name(), id = %id, removed, "Deleted rule");
        Ok(removed)
    }

    /// Atomically bump a rule's visit counter, returning the new value
    pub async fn increment_visits(&self, rule_type: RuleType, id: &str) -> GatewayResult<u64> {
        let value = self
            .backend
            .hincr(&rule_type.visits_key(&self.prefix), id, 1)
            .await?;
        u64::try_from(value).map_err(|_| GatewayError::store(format!("visit counter for '{}' is negative", id)))
    }

    /// Whether the backend answers
    pub async fn health_check(&self) -> GatewayResult<bool> {
        Ok(self.backend.health_check().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{BlacklistRule, PredicateDefinition, RouteRule};
    use crate::storage::InMemoryHashStore;
    use chrono::{Duration, Utc};

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(InMemoryHashStore::new()), "gateway:")
    }

    fn blacklist(path: &str) -> BlacklistRule {
        BlacklistRule {
            ip: "10.0.0.1".into(),
            method: "GET".into(),
            path: path.into(),
            description: "manual".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_generates_id_and_keeps_fields() {
        let store = store();
        let rule = blacklist("/admin/**");

        let stored = store.put(rule.clone()).await.unwrap();
        let id = stored.id.clone().unwrap();
        assert!(!id.is_empty());
        assert!(stored.create_time.is_some());

        let fetched: BlacklistRule = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id.as_deref(), Some(id.as_str()));
        assert_eq!(fetched.ip, rule.ip);
        assert_eq!(fetched.method, rule.method);
        assert_eq!(fetched.path, rule.path);
        assert_eq!(fetched.description, rule.description);
        assert_eq!(fetched.status, rule.status);
    }

    #[tokio::test]
    async fn test_put_keeps_existing_id_and_create_time() {
        let store = store();
        let created = Utc::now() - Duration::days(1);
        let rule = BlacklistRule {
            id: Some("fixed".into()),
            create_time: Some(created),
            ..blacklist("/x")
        };

        let stored = store.put(rule).await.unwrap();
        assert_eq!(stored.id.as_deref(), Some("fixed"));
        assert_eq!(stored.create_time, Some(created));
    }

    #[tokio::test]
    async fn test_list_is_empty_without_puts() {
        let store = store();
        assert!(store.list::<BlacklistRule>().await.unwrap().is_empty());
        assert!(store.list::<RouteRule>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = store();
        let stored = store.put(blacklist("/a")).await.unwrap();
        let updated = BlacklistRule {
            path: "/b".into(),
            ..stored.clone()
        };
        store.put(updated).await.unwrap();

        let all: Vec<BlacklistRule> = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path, "/b");
    }

    #[tokio::test]
    async fn test_delete_then_get_is_absent() {
        let store = store();
        let stored = store.put(blacklist("/a")).await.unwrap();
        let id = stored.id.unwrap();
        store.increment_visits(RuleType::Blacklist, &id).await.unwrap();

        assert!(store.delete(RuleType::Blacklist, &id).await.unwrap());
        assert!(store.get::<BlacklistRule>(&id).await.unwrap().is_none());
        assert!(!store.delete(RuleType::Blacklist, &id).await.unwrap());

        // A re-created rule with the same id starts counting from zero
        store
            .put(BlacklistRule {
                id: Some(id.clone()),
                ..blacklist("/a")
            })
            .await
            .unwrap();
        let fetched: BlacklistRule = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.visits, 0);
    }

    #[tokio::test]
    async fn test_visits_are_merged_on_read() {
        let store = store();
        let stored = store
            .put(BlacklistRule {
                visits: 99,
                ..blacklist("/a")
            })
            .await
            .unwrap();
        let id = stored.id.unwrap();

        // Stored body value is ignored, the counter hash is authoritative
        let fetched: BlacklistRule = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.visits, 0);

        store.increment_visits(RuleType::Blacklist, &id).await.unwrap();
        store.increment_visits(RuleType::Blacklist, &id).await.unwrap();

        let fetched: BlacklistRule = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.visits, 2);
        let listed: Vec<BlacklistRule> = store.list().await.unwrap();
        assert_eq!(listed[0].visits, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_sum_up() {
        let store = store();
        let id = store.put(blacklist("/a")).await.unwrap().id.unwrap();

        let callers = 64;
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.increment_visits(RuleType::Blacklist, &id).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let fetched: BlacklistRule = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.visits, callers);
    }

    #[tokio::test]
    async fn test_list_orders_by_create_time() {
        let store = store();
        let now = Utc::now();
        for (id, offset) in [("late", 10), ("early", 1), ("middle", 5)] {
            store
                .put(RouteRule {
                    id: Some(id.into()),
                    name: id.into(),
                    uri: "http://localhost:9000".into(),
                    predicates: vec![PredicateDefinition::new("Path", vec!["/x".into()])],
                    create_time: Some(now + Duration::seconds(offset)),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let ids: Vec<String> = store
            .list::<RouteRule>()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|rule| rule.id)
            .collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_unreadable_entries_are_skipped() {
        let backend = Arc::new(InMemoryHashStore::new());
        let store = RuleStore::new(backend.clone(), "gateway:");
        store.put(blacklist("/ok")).await.unwrap();
        backend
            .hset(&RuleType::Blacklist.hash_key("gateway:"), "broken", "{not json")
            .await
            .unwrap();

        let rules: Vec<BlacklistRule> = store.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].path, "/ok");
    }
}

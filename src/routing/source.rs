//! # Route Definition Sources
//!
//! Where dynamic routes live. Exactly one source is active per deployment, chosen by
//! `route_source.kind`:
//!
//! - [`RedisRouteSource`]: routes are rules of type `Route` in the rule store
//! - [`NacosRouteSource`](super::nacos::NacosRouteSource): routes are a JSON array in
//!   one Nacos config entry
//!
//! Every successful write publishes `RoutesChanged`. The route table is rebuilt
//! asynchronously when that event arrives, so a request racing a write may still be
//! routed by the previous table.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::GatewayResult;
use crate::core::events::{EventBus, RuleEvent};
use crate::rules::{RouteRule, RuleStore, RuleType};

/// Storage for admin-managed route definitions
#[async_trait]
pub trait RouteDefinitionSource: Send + Sync {
    /// Short name for logs and health output
    fn kind(&self) -> &'static str;

    /// Every stored route, in creation order
    async fn list(&self) -> GatewayResult<Vec<RouteRule>>;

    async fn get(&self, id: &str) -> GatewayResult<Option<RouteRule>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|route| route.id.as_deref() == Some(id)))
    }

    /// Insert or overwrite; missing id and createTime are filled in
    async fn save(&self, route: RouteRule) -> GatewayResult<RouteRule>;

    /// Remove a route; returns whether it existed
    async fn delete(&self, id: &str) -> GatewayResult<bool>;
}

/// Routes kept in the rule store
pub struct RedisRouteSource {
    store: RuleStore,
    events: Arc<EventBus>,
}

impl RedisRouteSource {
    pub fn new(store: RuleStore, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }
}

#[async_trait]
impl RouteDefinitionSource for RedisRouteSource {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn list(&self) -> GatewayResult<Vec<RouteRule>> {
        self.store.list().await
    }

    async fn get(&self, id: &str) -> GatewayResult<Option<RouteRule>> {
        self.store.get(id).await
    }

    async fn save(&self, mut route: RouteRule) -> GatewayResult<RouteRule> {
        route.dynamic = true;
        let stored = self.store.put(route).await?;
        self.events.publish(RuleEvent::RoutesChanged).await;
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> GatewayResult<bool> {
        let removed = self.store.delete(RuleType::Route, id).await?;
        if removed {
            self.events.publish(RuleEvent::RoutesChanged).await;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::PredicateDefinition;
    use crate::storage::InMemoryHashStore;

    fn source() -> (RedisRouteSource, Arc<EventBus>) {
        let events = Arc::new(EventBus::new(16));
        let store = RuleStore::new(Arc::new(InMemoryHashStore::new()), "gateway:");
        (RedisRouteSource::new(store, events.clone()), events)
    }

    fn route() -> RouteRule {
        RouteRule {
            name: "svc-a".into(),
            uri: "lb://svc-a".into(),
            predicates: vec![PredicateDefinition::new("Path", vec!["/a/**".into()])],
            dynamic: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_publishes_and_marks_dynamic() {
        let (source, events) = source();
        let mut rx = events.subscribe();

        let saved = source.save(route()).await.unwrap();
        assert!(saved.dynamic);
        assert_eq!(rx.recv().await.unwrap(), RuleEvent::RoutesChanged);

        let id = saved.id.clone().unwrap();
        assert_eq!(source.get(&id).await.unwrap(), Some(saved));
        assert_eq!(source.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_publishes_nothing() {
        let (source, events) = source();
        let mut rx = events.subscribe();

        assert!(!source.delete("missing").await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_existing_route() {
        let (source, events) = source();
        let id = source.save(route()).await.unwrap().id.unwrap();
        let mut rx = events.subscribe();

        assert!(source.delete(&id).await.unwrap());
        assert_eq!(rx.recv().await.unwrap(), RuleEvent::RoutesChanged);
        assert!(source.get(&id).await.unwrap().is_none());
    }
}

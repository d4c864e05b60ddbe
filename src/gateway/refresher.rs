//! Keeps the route table and blacklist snapshot in step with rule change events.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::blacklist::BlacklistCache;
use crate::core::events::{EventBus, RuleEvent};
use crate::routing::RouteCache;
use crate::rules::RuleStore;

#[derive(Clone)]
pub struct RuleRefresher {
    routes: Arc<RouteCache>,
    blacklist: Arc<BlacklistCache>,
    store: RuleStore,
}

impl RuleRefresher {
    pub fn new(routes: Arc<RouteCache>, blacklist: Arc<BlacklistCache>, store: RuleStore) -> Self {
        Self {
            routes,
            blacklist,
            store,
        }
    }

    pub async fn refresh_routes(&self) {
        if let Err(e) = self.routes.reload().await {
            error!(error = %e, "Failed to refresh routes");
        }
    }

    pub async fn refresh_blacklist(&self) {
        if let Err(e) = self.blacklist.reload(&self.store).await {
            error!(error = %e, "Failed to refresh blacklist");
        }
    }

    pub async fn refresh_all(&self) {
        self.refresh_routes().await;
        self.refresh_blacklist().await;
    }

    /// Reload on every event until the bus is dropped
    ///
    /// A lagging receiver has lost events, so both caches are reloaded.
    pub fn spawn(self, events: &EventBus) -> JoinHandle<()> {
        let mut receiver = events.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(RuleEvent::RoutesChanged) => self.refresh_routes().await,
                    Ok(RuleEvent::BlacklistChanged) => self.refresh_blacklist().await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Rule event receiver lagged, reloading everything");
                        self.refresh_all().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Rule event bus closed, refresher stopping");
                        break;
                    }
                }
            }
        })
    }
}

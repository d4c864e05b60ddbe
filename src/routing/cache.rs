//! # Route Cache
//!
//! Holds the live [`RouteTable`]. Requests take a snapshot (`Arc`) and match against
//! it; `reload` builds a replacement from the static routes plus the dynamic source and
//! swaps it in. A failed reload keeps serving the previous table.

use std::sync::Arc;
use tracing::{error, info};

use super::router::RouteTable;
use super::source::RouteDefinitionSource;
use crate::core::error::GatewayResult;
use crate::core::snapshot::SnapshotCell;
use crate::observability::metrics;
use crate::rules::RouteRule;

pub struct RouteCache {
    table: SnapshotCell<RouteTable>,
    source: Arc<dyn RouteDefinitionSource>,
    static_routes: Vec<RouteRule>,
}

impl RouteCache {
    /// Static routes are forced to `dynamic: false`
    pub fn new(source: Arc<dyn RouteDefinitionSource>, static_routes: Vec<RouteRule>) -> Self {
        let static_routes: Vec<RouteRule> = static_routes
            .into_iter()
            .map(|mut route| {
                route.dynamic = false;
                route
            })
            .collect();

        Self {
            table: SnapshotCell::new(RouteTable::build(static_routes.clone())),
            source,
            static_routes,
        }
    }

    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load()
    }

    pub fn source(&self) -> &Arc<dyn RouteDefinitionSource> {
        &self.source
    }

    /// Rebuild the table from the source; returns the number of active routes
    pub async fn reload(&self) -> GatewayResult<usize> {
        let dynamic = match self.source.list().await {
            Ok(routes) => routes,
            Err(e) => {
                error!(source = self.source.kind(), error = %e, "Route reload failed, keeping previous table");
                metrics::record_route_refresh(false);
                return Err(e);
            }
        };

        let dynamic_count = dynamic.len();
        let table = RouteTable::build(self.static_routes.iter().cloned().chain(dynamic));
        let active = table.len();
        self.table.store(table);
        metrics::record_route_refresh(true);

        info!(
            source = self.source.kind(),
            static_routes = self.static_routes.len(),
            dynamic_routes = dynamic_count,
            active_routes = active,
            "Route table rebuilt"
        );
        Ok(active)
    }
}

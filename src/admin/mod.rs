//! # Admin Module
//!
//! The management API served on the admin listener:
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET, POST | `/admin/gateway/blacklist` | list, create or update |
//! | GET, DELETE | `/admin/gateway/blacklist/:id` | |
//! | GET, POST | `/admin/gateway/routes` | list, create or update |
//! | GET, DELETE | `/admin/gateway/routes/:id` | |
//! | POST | `/admin/gateway/routes/refresh` | rebuild the route table now |
//! | GET | `/admin/gateway/routes/active` | compiled table in match order |
//! | GET | `/health` | store and route table status |
//! | GET | `/metrics` | Prometheus text, when metrics are enabled |
//!
//! ## Security Considerations
//! Everything under `/admin/gateway` requires `Authorization: Bearer <admin.api_token>`
//! when a token is configured. `/health` and `/metrics` stay open for probes and scrapers.

pub mod auth;
pub mod endpoints;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::blacklist::BlacklistCache;
use crate::core::events::EventBus;
use crate::routing::RouteCache;
use crate::rules::RuleStore;

/// Shared state of the admin listener
#[derive(Clone)]
pub struct AdminState {
    pub store: RuleStore,
    pub routes: Arc<RouteCache>,
    pub blacklist: Arc<BlacklistCache>,
    pub events: Arc<EventBus>,
    pub metrics: Option<PrometheusHandle>,
    pub api_token: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: bool,
    pub route_source: &'static str,
    pub active_routes: usize,
    pub blacklist_rules: usize,
}

/// Router for the admin listener
pub struct AdminRouter;

impl AdminRouter {
    pub fn create_router(state: AdminState) -> Router {
        let managed = Router::new()
            .route(
                "/blacklist",
                get(endpoints::list_blacklist).post(endpoints::save_blacklist),
            )
            .route(
                "/blacklist/:id",
                get(endpoints::get_blacklist).delete(endpoints::delete_blacklist),
            )
            .route("/routes", get(endpoints::list_routes).post(endpoints::save_route))
            // Literal segments take precedence over `:id`
            .route("/routes/refresh", post(endpoints::refresh_routes))
            .route("/routes/active", get(endpoints::active_routes))
            .route("/routes/:id", get(endpoints::get_route).delete(endpoints::delete_route))
            .route_layer(middleware::from_fn_with_state(
                state.api_token.clone(),
                auth::admin_auth_middleware,
            ));

        Router::new()
            .nest("/admin/gateway", managed)
            .route("/health", get(health))
            .route("/metrics", get(render_metrics))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}

async fn health(State(state): State<AdminState>) -> Response {
    let store = state.store.health_check().await.unwrap_or(false);
    let body = HealthResponse {
        status: if store { "UP" } else { "DOWN" },
        store,
        route_source: state.routes.source().kind(),
        active_routes: state.routes.snapshot().len(),
        blacklist_rules: state.blacklist.snapshot().len(),
    };
    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn render_metrics(State(state): State<AdminState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

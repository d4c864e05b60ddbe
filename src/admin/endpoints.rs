//! # Admin Endpoints
//!
//! CRUD for blacklist rules and route definitions, plus a manual route refresh.
//! Every write is validated first (400 with one message per field), logged as an
//! audit event, and followed by a change event so all gateway instances reload.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::Serialize;

use super::auth::OPERATOR_HEADER;
use super::AdminState;
use crate::core::error::{FieldError, GatewayError, GatewayResult};
use crate::core::events::RuleEvent;
use crate::observability::logging::audit;
use crate::routing::ActiveRoute;
use crate::rules::{BlacklistRule, RouteRule, Rule, RuleType};

/// Result of a delete call
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: String,
    /// False when nothing was stored under the id
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub active_routes: usize,
}

fn operator(headers: &HeaderMap) -> Option<&str> {
    headers.get(OPERATOR_HEADER).and_then(|value| value.to_str().ok())
}

/// Unwrap a JSON body, turning a parse failure into a validation error
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| GatewayError::validation(vec![FieldError::new("body", rejection.body_text())]))
}

fn validated<R: Rule>(rule: R) -> GatewayResult<R> {
    let errors = rule.validate();
    if errors.is_empty() {
        Ok(rule)
    } else {
        Err(GatewayError::validation(errors))
    }
}

// Blacklist

pub async fn list_blacklist(State(state): State<AdminState>) -> GatewayResult<Json<Vec<BlacklistRule>>> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_blacklist(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> GatewayResult<Json<BlacklistRule>> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::not_found("Blacklist rule", id))
}

pub async fn save_blacklist(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Result<Json<BlacklistRule>, JsonRejection>,
) -> GatewayResult<Json<BlacklistRule>> {
    let rule = validated(json_body(body)?)?;
    let stored = state.store.put(rule).await?;
    let id = stored.id.clone().unwrap_or_default();

    audit("save", RuleType::Blacklist.name(), &id, operator(&headers));
    state.events.publish(RuleEvent::BlacklistChanged).await;
    Ok(Json(stored))
}

pub async fn delete_blacklist(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> GatewayResult<Json<DeleteResponse>> {
    let deleted = state.store.delete(RuleType::Blacklist, &id).await?;
    if deleted {
        audit("delete", RuleType::Blacklist.name(), &id, operator(&headers));
        state.events.publish(RuleEvent::BlacklistChanged).await;
    }
    Ok(Json(DeleteResponse { id, deleted }))
}

// Routes

pub async fn list_routes(State(state): State<AdminState>) -> GatewayResult<Json<Vec<RouteRule>>> {
    Ok(Json(state.routes.source().list().await?))
}

pub async fn get_route(State(state): State<AdminState>, Path(id): Path<String>) -> GatewayResult<Json<RouteRule>> {
    state
        .routes
        .source()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::not_found("Route", id))
}

pub async fn save_route(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Result<Json<RouteRule>, JsonRejection>,
) -> GatewayResult<Json<RouteRule>> {
    let route = validated(json_body(body)?)?;
    let stored = state.routes.source().save(route).await?;

    audit(
        "save",
        RuleType::Route.name(),
        stored.id.as_deref().unwrap_or_default(),
        operator(&headers),
    );
    Ok(Json(stored))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> GatewayResult<Json<DeleteResponse>> {
    let deleted = state.routes.source().delete(&id).await?;
    if deleted {
        audit("delete", RuleType::Route.name(), &id, operator(&headers));
    }
    Ok(Json(DeleteResponse { id, deleted }))
}

/// Rebuild the route table now instead of waiting for the change event
pub async fn refresh_routes(State(state): State<AdminState>) -> GatewayResult<Json<RefreshResponse>> {
    let active_routes = state.routes.reload().await?;
    Ok(Json(RefreshResponse { active_routes }))
}

/// The compiled table, in match order
pub async fn active_routes(State(state): State<AdminState>) -> Json<Vec<ActiveRoute>> {
    Json(state.routes.snapshot().describe())
}

//! Bearer token check for the admin API.
//!
//! With no `admin.api_token` configured every request passes. Otherwise the request
//! must carry `Authorization: Bearer <token>`.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::core::error::GatewayError;

/// Header naming the operator, recorded in audit logs
pub const OPERATOR_HEADER: &str = "x-admin-user";

pub async fn admin_auth_middleware(
    State(token): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = match token {
        Some(token) => token,
        None => return next.run(request).await,
    };

    let verdict = extract_bearer_token(&request)
        .map(|presented| token_matches(presented, &expected));

    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => {
            warn!(path = %request.uri().path(), "Rejected admin request with invalid token");
            GatewayError::auth("invalid admin token").into_response()
        }
        None => GatewayError::auth("missing bearer token").into_response(),
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

fn token_matches(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

//! # Fallback Responder
//!
//! When a downstream call fails (timeout, connection refused, no instance for an
//! `lb://` service) or the gateway itself rejects a request, the client gets one
//! fixed JSON shape:
//!
//! ```json
//! {"code": 503, "messageId": 50300, "message": "...", "successful": false, "timestamp": 1700000000000}
//! ```
//!
//! `code` is the HTTP status, `timestamp` is epoch milliseconds. No retry happens here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::core::error::GatewayError;
use crate::observability::metrics;

/// Uniform error body returned for every rejected or failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// HTTP status code
    pub code: u16,
    /// Stable numeric id for the kind of failure
    pub message_id: u32,
    /// Human-readable description
    pub message: String,
    /// Always false for this envelope
    pub successful: bool,
    /// Epoch milliseconds when the envelope was built
    pub timestamp: i64,
}

impl ErrorEnvelope {
    pub fn new<S: Into<String>>(status: StatusCode, message_id: u32, message: S) -> Self {
        Self {
            code: status.as_u16(),
            message_id,
            message: message.into(),
            successful: false,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Build the envelope for a gateway error using its own status code
    pub fn from_error(error: &GatewayError) -> Self {
        Self::new(error.status_code(), error.message_id(), error.to_string())
    }

    /// The HTTP status this envelope will be sent with
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Answer a failed downstream call for `uri`
///
/// Downstream failures become 503, anything else 500. The original error keeps its
/// message id so operators can still tell a timeout from a refused connection.
pub fn fallback_response(uri: &str, failure: &GatewayError) -> Response {
    let status = if failure.is_downstream_failure() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    if status == StatusCode::SERVICE_UNAVAILABLE {
        warn!(
            uri = %uri,
            error = %failure,
            error_type = failure.error_type(),
            "Downstream call failed, serving fallback response"
        );
    } else {
        error!(
            uri = %uri,
            error = %failure,
            error_type = failure.error_type(),
            "Request failed inside the gateway, serving fallback response"
        );
    }
    metrics::record_fallback(status);

    ErrorEnvelope::new(status, failure.message_id(), failure.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = GatewayError::RouteNotFound { path: "/nope".into() }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["code"], 404);
        assert_eq!(body["messageId"], 40400);
        assert_eq!(body["successful"], false);
        assert!(body["message"].as_str().unwrap().contains("/nope"));
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_fallback_uses_503_for_downstream_failures() {
        let failure = GatewayError::service_unavailable("svc-a", "connection refused");
        let response = fallback_response("lb://svc-a/orders", &failure);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["code"], 503);
        assert_eq!(body["messageId"], 50300);
    }

    #[tokio::test]
    async fn test_fallback_uses_500_for_internal_failures() {
        let failure = GatewayError::internal("invalid header value");
        let response = fallback_response("http://localhost:9000/x", &failure);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["code"], 500);
        assert_eq!(body["successful"], false);
    }
}

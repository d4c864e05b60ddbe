//! # Error Handling Module
//!
//! This module defines every error the gateway can produce, built on the `thiserror` crate,
//! and maps each one to an HTTP status code and a numeric message id for the client.
//!
//! ## How Errors Reach the Client
//!
//! Rust has no exceptions, so every fallible operation returns a `Result<T, E>`:
//! - Store and HTTP client failures are converted into `GatewayError` with `From` impls
//! - The `?` operator propagates them unchanged up to the axum handler
//! - `IntoResponse` turns the error into the uniform JSON error envelope
//!
//! Nothing in between retries or swallows an error. The one translation point is the
//! `IntoResponse` impl at the bottom of this file.
//!
//! ## Error Categories
//! - **Not found**: a rule, route or request path with nothing behind it (404)
//! - **Validation**: a malformed save request, with one message per field (400)
//! - **Downstream unavailable**: Redis, Nacos or the proxied service is unreachable (503)
//! - **Unauthorized / forbidden**: missing admin credentials or a blacklisted client (401/403)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use thiserror::Error;

use crate::core::fallback::ErrorEnvelope;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A single field-level validation failure
///
/// Save requests are checked by an explicit `validate()` on each rule struct, which
/// returns a list of these instead of stopping at the first problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field, in its JSON spelling
    pub field: String,
    /// Human-readable description of the problem
    pub message: String,
}

impl FieldError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error types for the gateway
///
/// Each variant carries just enough context to build a useful client message.
/// The `#[error("...")]` attribute implements `Display` for us.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Missing or invalid admin credentials
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Authenticated but not allowed
    #[error("Authorization failed: {reason}")]
    Authorization { reason: String },

    /// The client matched an active blacklist rule
    #[error("Access denied: client {ip} is blacklisted for {path}")]
    Blacklisted { ip: String, path: String },

    /// A route's request rate limiter rejected the request
    #[error("Rate limit exceeded on route '{route}'")]
    RateLimitExceeded { route: String },

    /// No route matched the request
    #[error("No route found for path: {path}")]
    RouteNotFound { path: String },

    /// A requested rule or entity does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// A save request failed field validation
    #[error("Request validation failed: {}", join_field_errors(.errors))]
    RequestValidation { errors: Vec<FieldError> },

    /// Upstream service is unavailable or unreachable
    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// Upstream call exceeded its timeout
    #[error("Upstream timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The rule store (Redis or in-memory) failed
    #[error("Rule store error: {message}")]
    Store { message: String },

    /// The Nacos config service failed or returned something unusable
    #[error("Nacos error: {message}")]
    Nacos { message: String },

    /// HTTP client errors when making upstream requests
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create a not found error for a resource kind and id
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a validation error from field errors
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::RequestValidation { errors }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a Nacos error with a custom message
    pub fn nacos<S: Into<String>>(message: S) -> Self {
        Self::Nacos {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::Blacklisted { .. } => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Nacos { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::HttpClient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Numeric message id carried in the error envelope
    ///
    /// The first three digits are the HTTP status, the last two tell apart
    /// errors that share a status.
    pub fn message_id(&self) -> u32 {
        match self {
            Self::Authentication { .. } => 40100,
            Self::Authorization { .. } => 40300,
            Self::Blacklisted { .. } => 40301,
            Self::RateLimitExceeded { .. } => 42900,
            Self::RouteNotFound { .. } => 40400,
            Self::NotFound { .. } => 40401,
            Self::RequestValidation { .. } => 40000,
            Self::ServiceUnavailable { .. } => 50300,
            Self::Timeout { .. } => 50301,
            Self::HttpClient { .. } => 50302,
            Self::Store { .. } => 50310,
            Self::Nacos { .. } => 50320,
            Self::Internal { .. } => 50000,
            Self::Configuration { .. } => 50001,
            Self::Io { .. } => 50002,
            Self::Json { .. } => 50003,
            Self::Yaml { .. } => 50004,
        }
    }

    /// Whether this error means a downstream dependency could not be reached
    ///
    /// The fallback responder answers these with 503 and everything else with 500.
    pub fn is_downstream_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. }
                | Self::Timeout { .. }
                | Self::HttpClient { .. }
                | Self::Store { .. }
                | Self::Nacos { .. }
        )
    }

    /// Get a string representation of the error type for logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Authorization { .. } => "authorization_error",
            Self::Blacklisted { .. } => "blacklisted",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::NotFound { .. } => "not_found",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Store { .. } => "store_error",
            Self::Nacos { .. } => "nacos_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Every error leaves the gateway as the same JSON envelope
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        ErrorEnvelope::from_error(&self).into_response()
    }
}

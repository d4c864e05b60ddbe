//! # Metrics
//!
//! Counters for the decisions the gateway makes on its own: blocked requests, rate
//! limit breaches, fallback responses and route table rebuilds. Recording goes through
//! the `metrics` facade; without an installed recorder the calls are no-ops, which is
//! what unit tests rely on.
//!
//! `install_recorder` installs the Prometheus recorder and returns the handle the
//! admin `/metrics` endpoint renders from.

use axum::http::StatusCode;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const REQUESTS_BLOCKED: &str = "gateway_requests_blocked_total";
pub const REQUESTS_RATE_LIMITED: &str = "gateway_requests_rate_limited_total";
pub const FALLBACK_RESPONSES: &str = "gateway_fallback_total";
pub const ROUTE_REFRESHES: &str = "gateway_route_refresh_total";

/// Errors that can occur during metrics setup
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to initialize metrics exporter: {0}")]
    InitializationError(String),
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `/metrics` on the admin listener
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Install the global Prometheus recorder
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::InitializationError(e.to_string()))?;

    metrics::describe_counter!(REQUESTS_BLOCKED, "Requests rejected by a blacklist rule");
    metrics::describe_counter!(REQUESTS_RATE_LIMITED, "Requests rejected by a route rate limiter");
    metrics::describe_counter!(FALLBACK_RESPONSES, "Fallback envelopes served for failed requests");
    metrics::describe_counter!(ROUTE_REFRESHES, "Route table rebuilds by outcome");

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

pub fn record_blocked(rule_id: &str) {
    metrics::counter!(REQUESTS_BLOCKED, "rule" => rule_id.to_string()).increment(1);
}

pub fn record_rate_limited(route_id: &str) {
    metrics::counter!(REQUESTS_RATE_LIMITED, "route" => route_id.to_string()).increment(1);
}

pub fn record_fallback(status: StatusCode) {
    metrics::counter!(FALLBACK_RESPONSES, "status" => status.as_u16().to_string()).increment(1);
}

pub fn record_route_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(ROUTE_REFRESHES, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        record_blocked("b1");
        record_rate_limited("r1");
        record_fallback(StatusCode::SERVICE_UNAVAILABLE);
        record_route_refresh(true);
    }

    #[test]
    fn test_metrics_enabled_by_default() {
        assert!(MetricsConfig::default().enabled);
    }
}

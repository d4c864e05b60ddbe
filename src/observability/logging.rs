//! # Structured Logging
//!
//! `tracing` subscriber setup. Output is JSON for log shippers or human-readable text
//! for local runs; the level comes from `RUST_LOG` when set, otherwise from config.
//!
//! Audit events for rule changes are written with [`audit`] under the `audit` target
//! so they can be routed separately.

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `dynamic_gateway=debug,info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Install the global subscriber
///
/// Returns false when a subscriber was already installed (tests, embedding).
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
            .is_ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %config.level, format = ?config.format, "Logging initialized");
    }
    installed
}

/// Record an admin change to a rule
pub fn audit(action: &str, resource: &str, id: &str, actor: Option<&str>) {
    info!(
        target: "audit",
        action = %action,
        resource = %resource,
        id = %id,
        actor = actor.unwrap_or("anonymous"),
        "Rule changed"
    );
}

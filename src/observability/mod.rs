// Metrics collection and the Prometheus recorder
pub mod metrics;

// Structured logging and audit events
pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{install_recorder, MetricsConfig};

//! # Dynamic Gateway Library
//!
//! An API gateway whose routes and blacklist rules are managed at runtime. Rules are
//! persisted in Redis (routes optionally in a Nacos config entry), every write is
//! announced as a change event, and each gateway instance rebuilds its in-memory route
//! table and blacklist snapshot when the event arrives.
//!
//! ## Request Path
//!
//! 1. The blacklist evaluator checks the client against active rules and counts the hit
//! 2. The route table picks the first matching route by `order`
//! 3. A `RequestRateLimiter` filter may reject the request and blacklist the client
//! 4. Filters rewrite the request, which is forwarded to an `http(s)://` or `lb://` target
//! 5. Rejections and downstream failures leave as one JSON error envelope
//!
//! ## Modules
//!
//! - `core`: configuration, errors, the fallback envelope, the event bus
//! - `storage`: hash store backends (Redis, in-memory)
//! - `rules`: rule schemas and the generic rule store
//! - `blacklist`: blacklist snapshot and evaluator
//! - `routing`: predicates, filters, the route table and route sources
//! - `middleware`: the token bucket behind `RequestRateLimiter`
//! - `gateway`: the proxy handler and assembly of all components
//! - `admin`: the management API
//! - `observability`: logging and metrics

pub mod admin;
pub mod blacklist;
pub mod core;
pub mod gateway;
pub mod middleware;
pub mod observability;
pub mod routing;
pub mod rules;
pub mod storage;

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

pub use core::fallback::ErrorEnvelope;
pub use core::types::IncomingRequest;
pub use gateway::Gateway;
pub use rules::{BlacklistRule, RouteRule, RuleStore, RuleType};

//! # Routing
//!
//! Route definitions come from a [`RouteDefinitionSource`] (Redis or Nacos) plus the
//! static routes in the config file. They are compiled into a [`RouteTable`] held by
//! the [`RouteCache`], which the proxy matches every request against.

pub mod cache;
pub mod filter;
pub mod nacos;
pub mod pattern;
pub mod predicate;
pub mod router;
pub mod source;

pub use cache::RouteCache;
pub use filter::{ForwardRequest, RateLimitSpec, RouteFilter};
pub use nacos::{NacosClient, NacosConfig, NacosRouteSource};
pub use pattern::PathPattern;
pub use predicate::RoutePredicate;
pub use router::{ActiveRoute, CompiledRoute, RouteMatch, RouteTable};
pub use source::{RedisRouteSource, RouteDefinitionSource};

//! # Route Table
//!
//! The compiled, immutable set of routes a request is matched against. A new table is
//! built from scratch whenever routes change and swapped in whole, so a request always
//! sees one consistent table for its entire lifetime.
//!
//! ## Matching
//!
//! Routes are kept sorted by `(order, id)`. The first route whose predicates all hold
//! wins, which makes `order` the priority: lower values are tried first, and ties are
//! broken by id so the result does not depend on load order.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<CompiledRoute>` lets a match outlive the table it came from
//! - Building returns a fresh value instead of mutating, so readers never need a lock

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::filter::{RateLimitSpec, RouteFilter};
use super::predicate::RoutePredicate;
use crate::core::types::IncomingRequest;
use crate::rules::RouteRule;

/// A route with its predicates and filters parsed
#[derive(Debug)]
pub struct CompiledRoute {
    pub id: String,
    pub rule: RouteRule,
    pub predicates: Vec<RoutePredicate>,
    pub filters: Vec<RouteFilter>,
}

impl CompiledRoute {
    /// Compile a rule, reporting the first definition that fails
    pub fn compile(id: String, rule: RouteRule) -> Result<Self, String> {
        let predicates = rule
            .predicates
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                RoutePredicate::compile(definition).map_err(|e| format!("predicates[{}]: {}", index, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if predicates.is_empty() {
            return Err("route has no predicates".to_string());
        }

        let filters = rule
            .filters
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                RouteFilter::compile(definition).map_err(|e| format!("filters[{}]: {}", index, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            rule,
            predicates,
            filters,
        })
    }

    pub fn uri(&self) -> &str {
        &self.rule.uri
    }

    /// Evaluate every predicate; path variables are collected on success
    pub fn matches(&self, request: &IncomingRequest, now: DateTime<Utc>) -> Option<HashMap<String, String>> {
        let mut path_vars = HashMap::new();
        for predicate in &self.predicates {
            if !predicate.test(request, now, &mut path_vars) {
                return None;
            }
        }
        Some(path_vars)
    }

    /// The route's rate limit, if it has a `RequestRateLimiter` filter
    pub fn rate_limit(&self) -> Option<(RateLimitSpec, &str)> {
        self.filters
            .iter()
            .find_map(RouteFilter::rate_limit)
            .map(|spec| (spec, self.rule.name.as_str()))
    }
}

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<CompiledRoute>,
    pub path_vars: HashMap<String, String>,
}

/// Summary of one active route, as shown by the admin API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRoute {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub order: i32,
    pub dynamic: bool,
    pub predicates: usize,
    pub filters: usize,
}

/// Immutable, ordered route table
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<CompiledRoute>>,
}

impl RouteTable {
    /// Compile and order a set of route rules
    ///
    /// Disabled routes are left out. Routes that fail to compile or reuse an id
    /// already in the table are skipped with a warning rather than failing the build.
    pub fn build(rules: impl IntoIterator<Item = RouteRule>) -> Self {
        let mut routes = Vec::new();

        for (index, rule) in rules.into_iter().enumerate() {
            if !rule.status {
                debug!(route = ?rule.id, name = %rule.name, "Skipping disabled route");
                continue;
            }

            let id = match rule.id.as_deref() {
                Some(id) if !id.trim().is_empty() => id.to_string(),
                _ => format!("static-{}", index),
            };

            match CompiledRoute::compile(id.clone(), rule) {
                Ok(route) => routes.push(route),
                Err(e) => warn!(route = %id, error = %e, "Skipping invalid route"),
            }
        }

        routes.sort_by(|a, b| a.rule.order.cmp(&b.rule.order).then_with(|| a.id.cmp(&b.id)));

        let mut seen = HashSet::new();
        routes.retain(|route| {
            let fresh = seen.insert(route.id.clone());
            if !fresh {
                warn!(route = %route.id, "Skipping route with duplicate id");
            }
            fresh
        });

        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// First route, in priority order, whose predicates all hold
    pub fn match_route(&self, request: &IncomingRequest) -> Option<RouteMatch> {
        let now = Utc::now();
        self.routes.iter().find_map(|route| {
            route.matches(request, now).map(|path_vars| RouteMatch {
                route: route.clone(),
                path_vars,
            })
        })
    }

    pub fn routes(&self) -> &[Arc<CompiledRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Summaries in match order
    pub fn describe(&self) -> Vec<ActiveRoute> {
        self.routes
            .iter()
            .map(|route| ActiveRoute {
                id: route.id.clone(),
                name: route.rule.name.clone(),
                uri: route.rule.uri.clone(),
                order: route.rule.order,
                dynamic: route.rule.dynamic,
                predicates: route.predicates.len(),
                filters: route.filters.len(),
            })
            .collect()
    }
}

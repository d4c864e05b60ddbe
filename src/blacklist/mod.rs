//! # Blacklist
//!
//! Per-request blacklist checks run against an in-memory snapshot of the blacklist
//! rules rather than the store. The snapshot is rebuilt from the rule store at startup
//! and whenever a `BlacklistChanged` event arrives.
//!
//! A rule blocks a request when all of these hold:
//!
//! - the rule is switched on and `now` lies inside its `[startTime, endTime]` window
//! - its Ant-style `path` matches the request path
//! - its `ip`, when set, is the client address or a CIDR block containing it
//! - its `method`, when set and not `*`, equals the request method
//!
//! Expired rules never match even though they stay in the store. When several rules
//! match, the one created first wins and receives the visit.

pub mod evaluator;

pub use evaluator::BlacklistEvaluator;

use axum::http::Method;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::GatewayResult;
use crate::core::ip::IpBlock;
use crate::core::snapshot::SnapshotCell;
use crate::core::types::IncomingRequest;
use crate::routing::pattern::PathPattern;
use crate::rules::{BlacklistRule, RuleStore};

/// A blacklist rule with its matchers parsed
#[derive(Debug)]
pub struct CompiledBlacklistRule {
    pub id: String,
    pub rule: BlacklistRule,
    path: PathPattern,
    ip: Option<IpBlock>,
    method: Option<Method>,
}

impl CompiledBlacklistRule {
    pub fn compile(rule: BlacklistRule) -> Result<Self, String> {
        let id = rule
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "rule has no id".to_string())?;

        let path = PathPattern::compile(&rule.path)?;

        let ip = match rule.ip.trim() {
            "" => None,
            value => Some(IpBlock::from_str(value)?),
        };

        let method = match rule.method.trim() {
            "" | "*" => None,
            value => Some(
                Method::from_str(&value.to_uppercase())
                    .map_err(|_| format!("'{}' is not an HTTP method", value))?,
            ),
        };

        Ok(Self {
            id,
            rule,
            path,
            ip,
            method,
        })
    }

    pub fn matches(&self, request: &IncomingRequest, now: DateTime<Utc>) -> bool {
        if !self.rule.is_active_at(now) {
            return false;
        }
        if !self.path.matches(request.path()) {
            return false;
        }
        if let Some(block) = &self.ip {
            match request.client_ip() {
                Some(ip) if block.contains(&ip) => {}
                _ => return false,
            }
        }
        if let Some(method) = &self.method {
            if *method != request.method {
                return false;
            }
        }
        true
    }
}

/// Compiled blacklist rules in creation order
#[derive(Debug, Default)]
pub struct BlacklistSnapshot {
    rules: Vec<CompiledBlacklistRule>,
}

impl BlacklistSnapshot {
    /// Compile rules, skipping ones that no longer parse
    ///
    /// Rules are expected in creation order, as `RuleStore::list` returns them.
    pub fn build(rules: impl IntoIterator<Item = BlacklistRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let id = rule.id.clone();
                match CompiledBlacklistRule::compile(rule) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        warn!(rule = ?id, error = %e, "Skipping invalid blacklist rule");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    pub fn find_match(&self, request: &IncomingRequest, now: DateTime<Utc>) -> Option<&CompiledBlacklistRule> {
        self.rules.iter().find(|rule| rule.matches(request, now))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Shared, swappable blacklist snapshot
#[derive(Default)]
pub struct BlacklistCache {
    snapshot: SnapshotCell<BlacklistSnapshot>,
}

impl BlacklistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<BlacklistSnapshot> {
        self.snapshot.load()
    }

    /// Replace the snapshot with the store's current rules
    ///
    /// On a store failure the previous snapshot stays in place.
    pub async fn reload(&self, store: &RuleStore) -> GatewayResult<usize> {
        let rules: Vec<BlacklistRule> = store.list().await?;
        let snapshot = BlacklistSnapshot::build(rules);
        let count = snapshot.len();
        self.snapshot.store(snapshot);
        info!(rules = count, "Blacklist snapshot reloaded");
        Ok(count)
    }
}

//! # Blacklist Evaluator
//!
//! `valid` answers "is this request blacklisted?" (true means block) and records the
//! visit on the matching rule. `set_black` is how a rate limiter turns an offending
//! client into a temporary blacklist entry. A client already blacklisted for a rule
//! is not stored again until that entry expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::BlacklistCache;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::events::{EventBus, RuleEvent};
use crate::core::types::IncomingRequest;
use crate::observability::metrics;
use crate::routing::pattern::PathPattern;
use crate::rules::{BlacklistRule, RuleStore, RuleType};

/// Default lifetime of a blacklist entry created by `set_black`
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(60 * 60);

pub struct BlacklistEvaluator {
    store: RuleStore,
    cache: Arc<BlacklistCache>,
    events: Arc<EventBus>,
    block_duration: Duration,
    /// `{trigger}:{ip}` -> end of the entry `set_black` stored for it
    blocked_until: DashMap<String, DateTime<Utc>>,
}

impl BlacklistEvaluator {
    pub fn new(store: RuleStore, cache: Arc<BlacklistCache>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            cache,
            events,
            block_duration: DEFAULT_BLOCK_DURATION,
            blocked_until: DashMap::new(),
        }
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn cache(&self) -> &Arc<BlacklistCache> {
        &self.cache
    }

    /// Whether the request must be blocked
    ///
    /// Requests without a remote address are never blocked. A hit increments the
    /// matching rule's visit counter; a counter failure is returned as an error.
    pub async fn valid(&self, request: &IncomingRequest) -> GatewayResult<bool> {
        let ip = match request.client_ip() {
            Some(ip) => ip,
            None => {
                debug!(request_id = %request.id, "No remote address, skipping blacklist check");
                return Ok(false);
            }
        };

        let snapshot = self.cache.snapshot();
        let rule = match snapshot.find_match(request, Utc::now()) {
            Some(rule) => rule,
            None => return Ok(false),
        };

        let visits = self.store.increment_visits(RuleType::Blacklist, &rule.id).await?;
        metrics::record_blocked(&rule.id);
        info!(
            request_id = %request.id,
            rule = %rule.id,
            ip = %ip,
            method = %request.method,
            path = %request.path(),
            visits,
            "Request blocked by blacklist rule"
        );
        Ok(true)
    }

    /// The error a blocked request is answered with
    pub fn rejection(&self, request: &IncomingRequest) -> GatewayError {
        GatewayError::Blacklisted {
            ip: request
                .client_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            path: request.path().to_string(),
        }
    }

    /// Blacklist the client behind `request` for the configured duration
    ///
    /// `trigger` names the rate limit rule that fired. Returns the stored rule, or
    /// `None` when the request has no remote address or the client is still
    /// blacklisted for `trigger`.
    pub async fn set_black(&self, request: &IncomingRequest, trigger: &str) -> GatewayResult<Option<BlacklistRule>> {
        let ip = match request.client_ip() {
            Some(ip) => ip,
            None => {
                warn!(
                    request_id = %request.id,
                    path = %request.path(),
                    trigger = %trigger,
                    "Cannot blacklist a request without a remote address"
                );
                return Ok(None);
            }
        };

        let duration = ChronoDuration::from_std(self.block_duration)
            .map_err(|e| GatewayError::internal(format!("block duration out of range: {}", e)))?;
        let start = Utc::now();
        let end = start + duration;
        let key = format!("{}:{}", trigger, ip);

        match self.blocked_until.entry(key.clone()) {
            Entry::Occupied(entry) if *entry.get() > start => {
                debug!(ip = %ip, trigger = %trigger, until = %entry.get(), "Client already blacklisted");
                return Ok(None);
            }
            entry => {
                entry.insert(end);
            }
        }
        self.blocked_until.retain(|_, until| *until > start);

        let path = request.path();
        let rule = BlacklistRule {
            id: None,
            ip: ip.to_string(),
            visits: 0,
            method: request.method.to_string(),
            description: format!("触发限流规则【{}】，访问路径【{}】，自动加入黑名单", trigger, path),
            path: PathPattern::literal(path),
            status: true,
            start_time: Some(start),
            end_time: Some(end),
            create_time: Some(start),
        };

        let stored = match self.store.put(rule).await {
            Ok(stored) => stored,
            Err(e) => {
                self.blocked_until.remove(&key);
                return Err(e);
            }
        };
        info!(
            rule = ?stored.id,
            ip = %ip,
            method = %stored.method,
            path = %stored.path,
            trigger = %trigger,
            until = ?stored.end_time,
            "Client blacklisted"
        );

        self.events.publish(RuleEvent::BlacklistChanged).await;
        Ok(Some(stored))
    }
}

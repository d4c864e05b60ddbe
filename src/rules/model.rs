//! Rule schemas as they are stored and exchanged with the admin UI (camelCase JSON).

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

use super::{Rule, RuleType};
use crate::core::error::FieldError;
use crate::core::ip::IpBlock;
use crate::routing::filter::RouteFilter;
use crate::routing::pattern::PathPattern;
use crate::routing::predicate::RoutePredicate;

fn default_true() -> bool {
    true
}

/// A temporary block on a client IP / method / path combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Client address or CIDR block; empty blocks every client
    #[serde(default)]
    pub ip: String,

    /// Times the rule blocked a request; derived from the counter hash on read
    #[serde(default)]
    pub visits: u64,

    /// HTTP method; empty or `*` blocks every method
    #[serde(default)]
    pub method: String,

    /// Ant-style path pattern
    #[serde(default)]
    pub path: String,

    /// Active flag
    #[serde(default = "default_true")]
    pub status: bool,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

impl Default for BlacklistRule {
    fn default() -> Self {
        Self {
            id: None,
            ip: String::new(),
            visits: 0,
            method: String::new(),
            path: String::new(),
            status: true,
            start_time: None,
            end_time: None,
            description: String::new(),
            create_time: None,
        }
    }
}

impl BlacklistRule {
    /// Whether the rule is switched on and `now` falls inside its time window
    ///
    /// A missing bound leaves that side of the window open.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.status {
            return false;
        }
        if let Some(start) = self.start_time {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return false;
            }
        }
        true
    }

    /// Logically expired: past its end time
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map(|end| now > end).unwrap_or(false)
    }
}

impl Rule for BlacklistRule {
    const RULE_TYPE: RuleType = RuleType::Blacklist;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn create_time(&self) -> Option<DateTime<Utc>> {
        self.create_time
    }

    fn set_create_time(&mut self, at: DateTime<Utc>) {
        self.create_time = Some(at);
    }

    fn set_visits(&mut self, visits: u64) {
        self.visits = visits;
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.path.trim().is_empty() {
            errors.push(FieldError::new("path", "must not be empty"));
        } else if let Err(e) = PathPattern::compile(&self.path) {
            errors.push(FieldError::new("path", e));
        }

        if !self.ip.trim().is_empty() {
            if let Err(e) = IpBlock::from_str(&self.ip) {
                errors.push(FieldError::new("ip", e));
            }
        }

        let method = self.method.trim();
        if !method.is_empty() && method != "*" && Method::from_str(&method.to_uppercase()).is_err() {
            errors.push(FieldError::new("method", format!("'{}' is not an HTTP method", method)));
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                errors.push(FieldError::new("endTime", "must not be before startTime"));
            }
        }

        errors
    }
}

/// Route predicate as stored: `{"name": "Path", "args": ["/a/**"]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateDefinition {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PredicateDefinition {
    pub fn new<S: Into<String>>(name: S, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// One key/value argument of a route filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterArg {
    pub key: String,
    pub value: String,
}

impl FilterArg {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Route filter as stored: `{"name": "StripPrefix", "args": [{"key": "parts", "value": "1"}]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub name: String,
    #[serde(default)]
    pub args: Vec<FilterArg>,
}

impl FilterDefinition {
    pub fn new<S: Into<String>>(name: S, args: Vec<FilterArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A gateway route definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    /// Target, `http(s)://host:port` or `lb://service-name`
    #[serde(default)]
    pub uri: String,

    #[serde(default = "default_true")]
    pub status: bool,

    /// All predicates must hold for the route to match
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,

    /// Applied in order when the route matches
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,

    /// Match priority, lower wins
    #[serde(default)]
    pub order: i32,

    /// Admin-managed (true) or from the static config file (false)
    #[serde(default = "default_true")]
    pub dynamic: bool,
}

impl Default for RouteRule {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            uri: String::new(),
            status: true,
            predicates: Vec::new(),
            filters: Vec::new(),
            description: String::new(),
            create_time: None,
            order: 0,
            dynamic: true,
        }
    }
}

impl Rule for RouteRule {
    const RULE_TYPE: RuleType = RuleType::Route;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn create_time(&self) -> Option<DateTime<Utc>> {
        self.create_time
    }

    fn set_create_time(&mut self, at: DateTime<Utc>) {
        self.create_time = Some(at);
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }

        if self.uri.trim().is_empty() {
            errors.push(FieldError::new("uri", "must not be empty"));
        } else {
            match Url::parse(&self.uri) {
                Ok(url) => {
                    if !matches!(url.scheme(), "http" | "https" | "lb") {
                        errors.push(FieldError::new(
                            "uri",
                            format!("unsupported scheme '{}', expected http, https or lb", url.scheme()),
                        ));
                    } else if url.host_str().map(str::is_empty).unwrap_or(true) {
                        errors.push(FieldError::new("uri", "must name a host or service"));
                    }
                }
                Err(e) => errors.push(FieldError::new("uri", format!("invalid URI: {}", e))),
            }
        }

        if self.predicates.is_empty() {
            errors.push(FieldError::new("predicates", "at least one predicate is required"));
        }
        for (index, predicate) in self.predicates.iter().enumerate() {
            if let Err(e) = RoutePredicate::compile(predicate) {
                errors.push(FieldError::new(format!("predicates[{}]", index), e));
            }
        }
        for (index, filter) in self.filters.iter().enumerate() {
            if let Err(e) = RouteFilter::compile(filter) {
                errors.push(FieldError::new(format!("filters[{}]", index), e));
            }
        }

        errors
    }
}

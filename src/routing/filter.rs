//! # Route Filters
//!
//! Filters rewrite the outgoing request (path, headers) before it is forwarded, or the
//! response headers on the way back. They run in the order the route lists them.
//!
//! Arguments are looked up by key. Definitions saved by admin UIs that only send
//! positional shortcuts (`_genkey_0`, `_genkey_1`, ...) are read by position instead.
//!
//! `RequestRateLimiter` does not touch the request; the proxy consults
//! [`RouteFilter::rate_limit`] before forwarding and blacklists clients that breach it.

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::HeaderMap;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

use crate::rules::FilterDefinition;

/// The outgoing request as filters see it
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

/// Token bucket parameters from a `RequestRateLimiter` filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSpec {
    /// Tokens added per second
    pub replenish_rate: f64,
    /// Bucket size
    pub burst_capacity: u32,
}

/// A compiled route filter
#[derive(Debug, Clone)]
pub enum RouteFilter {
    StripPrefix(usize),
    PrefixPath(String),
    SetPath(String),
    RewritePath { regex: Regex, replacement: String },
    AddRequestHeader { name: HeaderName, value: String },
    RemoveRequestHeader(HeaderName),
    AddResponseHeader { name: HeaderName, value: HeaderValue },
    RequestRateLimiter(RateLimitSpec),
}

impl RouteFilter {
    /// Parse a stored definition
    pub fn compile(definition: &FilterDefinition) -> Result<Self, String> {
        let args = Args(definition);

        match definition.name.as_str() {
            "StripPrefix" => {
                let parts = args.require(&["parts"], 0)?;
                let parts = parts
                    .parse::<usize>()
                    .map_err(|_| format!("parts must be a non-negative integer, got '{}'", parts))?;
                Ok(Self::StripPrefix(parts))
            }
            "PrefixPath" => {
                let prefix = args.require(&["prefix"], 0)?;
                if !prefix.starts_with('/') {
                    return Err(format!("prefix must start with '/', got '{}'", prefix));
                }
                Ok(Self::PrefixPath(prefix.trim_end_matches('/').to_string()))
            }
            "SetPath" => {
                let template = args.require(&["template"], 0)?;
                if !template.starts_with('/') {
                    return Err(format!("template must start with '/', got '{}'", template));
                }
                Ok(Self::SetPath(template.to_string()))
            }
            "RewritePath" => {
                let source = args.require(&["regexp", "regex"], 0)?;
                let replacement = args.get(&["replacement"], 1).unwrap_or("");
                let regex = Regex::new(source).map_err(|e| format!("invalid regexp '{}': {}", source, e))?;
                Ok(Self::RewritePath {
                    regex,
                    // `$\{name}` is the YAML-safe spelling of `${name}`
                    replacement: replacement.replace("$\\", "$"),
                })
            }
            "AddRequestHeader" => {
                let name = header_name(args.require(&["name"], 0)?)?;
                let value = args.require(&["value"], 1)?;
                // Templates are resolved per request, so only check the literal parts here
                HeaderValue::from_str(value).map_err(|_| format!("invalid header value '{}'", value))?;
                Ok(Self::AddRequestHeader {
                    name,
                    value: value.to_string(),
                })
            }
            "RemoveRequestHeader" => Ok(Self::RemoveRequestHeader(header_name(args.require(&["name"], 0)?)?)),
            "AddResponseHeader" => {
                let name = header_name(args.require(&["name"], 0)?)?;
                let value = args.require(&["value"], 1)?;
                let value = HeaderValue::from_str(value).map_err(|_| format!("invalid header value '{}'", value))?;
                Ok(Self::AddResponseHeader { name, value })
            }
            "RequestRateLimiter" => {
                let rate = args.require(&["replenishRate", "redis-rate-limiter.replenishRate"], 0)?;
                let replenish_rate = rate
                    .parse::<f64>()
                    .ok()
                    .filter(|rate| rate.is_finite() && *rate > 0.0)
                    .ok_or_else(|| format!("replenishRate must be a positive number, got '{}'", rate))?;

                let burst_capacity = match args.get(&["burstCapacity", "redis-rate-limiter.burstCapacity"], 1) {
                    Some(burst) => burst
                        .parse::<u32>()
                        .ok()
                        .filter(|burst| *burst > 0)
                        .ok_or_else(|| format!("burstCapacity must be a positive integer, got '{}'", burst))?,
                    None => replenish_rate.ceil().max(1.0) as u32,
                };

                Ok(Self::RequestRateLimiter(RateLimitSpec {
                    replenish_rate,
                    burst_capacity,
                }))
            }
            other => Err(format!("unknown filter '{}'", other)),
        }
    }

    /// Rewrite the outgoing request
    pub fn apply_request(&self, request: &mut ForwardRequest, path_vars: &HashMap<String, String>) {
        match self {
            Self::StripPrefix(parts) => request.path = strip_prefix(&request.path, *parts),
            Self::PrefixPath(prefix) => request.path = format!("{}{}", prefix, request.path),
            Self::SetPath(template) => request.path = expand(template, path_vars),
            Self::RewritePath { regex, replacement } => {
                request.path = regex.replace_all(&request.path, replacement.as_str()).into_owned();
                if !request.path.starts_with('/') {
                    request.path.insert(0, '/');
                }
            }
            Self::AddRequestHeader { name, value } => {
                if let Ok(value) = HeaderValue::from_str(&expand(value, path_vars)) {
                    request.headers.append(name.clone(), value);
                }
            }
            Self::RemoveRequestHeader(name) => {
                request.headers.remove(name);
            }
            Self::AddResponseHeader { .. } | Self::RequestRateLimiter(_) => {}
        }
    }

    /// Rewrite the response headers
    pub fn apply_response(&self, headers: &mut HeaderMap) {
        if let Self::AddResponseHeader { name, value } = self {
            headers.append(name.clone(), value.clone());
        }
    }

    pub fn rate_limit(&self) -> Option<RateLimitSpec> {
        match self {
            Self::RequestRateLimiter(spec) => Some(*spec),
            _ => None,
        }
    }
}

/// Argument lookup by key, falling back to position for `_genkey_N` shortcuts
struct Args<'a>(&'a FilterDefinition);

impl<'a> Args<'a> {
    fn get(&self, keys: &[&str], position: usize) -> Option<&'a str> {
        let definition: &'a FilterDefinition = self.0;
        let args = &definition.args;
        args.iter()
            .find(|arg| keys.iter().any(|key| arg.key.eq_ignore_ascii_case(key)))
            .or_else(|| args.get(position).filter(|arg| arg.key.starts_with("_genkey_")))
            .map(|arg| arg.value.trim())
    }

    fn require(&self, keys: &[&str], position: usize) -> Result<&'a str, String> {
        self.get(keys, position)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| format!("{} requires argument '{}'", self.0.name, keys[0]))
    }
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_str(name).map_err(|_| format!("invalid header name '{}'", name))
}

/// Drop the first `parts` segments of a path
fn strip_prefix(path: &str, parts: usize) -> String {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    if parts >= segments.len() {
        return "/".to_string();
    }

    let mut stripped = format!("/{}", segments[parts..].join("/"));
    if path.ends_with('/') {
        stripped.push('/');
    }
    stripped
}

/// Substitute `{name}` placeholders, leaving unknown ones as written
fn expand(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => {
                let name = &rest[open + 1..open + close];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[open..=open + close]),
                }
                rest = &rest[open + close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

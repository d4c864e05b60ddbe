//! # Upstream Resolution
//!
//! Turns a route's `uri` into the base URL a request is forwarded to.
//!
//! - `http://host:port` and `https://host:port` are used as they are
//! - `lb://service` picks the next endpoint of the configured upstream group, round-robin
//!
//! Only the scheme and authority of the route URI matter; the forwarded path comes from
//! the request after filters have run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use crate::core::config::UpstreamConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Endpoints of one `lb://` service with a rotating cursor
#[derive(Debug)]
struct UpstreamGroup {
    endpoints: Vec<String>,
    counter: AtomicUsize,
}

impl UpstreamGroup {
    fn next(&self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints.get(index).map(String::as_str)
    }
}

/// Resolves route URIs to concrete base URLs
#[derive(Debug, Default)]
pub struct UpstreamResolver {
    groups: HashMap<String, UpstreamGroup>,
}

impl UpstreamResolver {
    pub fn new(upstreams: &HashMap<String, UpstreamConfig>) -> Self {
        let groups = upstreams
            .iter()
            .map(|(name, config)| {
                let group = UpstreamGroup {
                    endpoints: config
                        .endpoints
                        .iter()
                        .map(|endpoint| endpoint.trim_end_matches('/').to_string())
                        .collect(),
                    counter: AtomicUsize::new(0),
                };
                (name.clone(), group)
            })
            .collect();

        Self { groups }
    }

    /// Base URL (scheme and authority, no trailing slash) for a route URI
    pub fn resolve(&self, uri: &str) -> GatewayResult<String> {
        let parsed = Url::parse(uri)
            .map_err(|e| GatewayError::internal(format!("route uri '{}' is invalid: {}", uri, e)))?;

        match parsed.scheme() {
            "lb" => {
                let service = parsed
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| GatewayError::internal(format!("route uri '{}' names no service", uri)))?;

                self.groups
                    .get(service)
                    .and_then(UpstreamGroup::next)
                    .map(str::to_string)
                    .ok_or_else(|| GatewayError::service_unavailable(service, "no available instance"))
            }
            "http" | "https" => Ok(parsed.origin().ascii_serialization()),
            other => Err(GatewayError::internal(format!("unsupported route scheme '{}'", other))),
        }
    }

    /// Full target URL for a resolved base, forwarded path and query
    pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
        let mut url = String::with_capacity(base.len() + path.len() + 16);
        url.push_str(base);
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

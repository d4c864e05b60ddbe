//! # Core Types Module
//!
//! The request type every gateway component works with. It is built once from the
//! axum request at the edge and then shared by reference through blacklist evaluation,
//! route matching and forwarding.

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use uuid::Uuid;

/// Represents an incoming request before it is forwarded
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Unique identifier for this request (for tracing and logging)
    pub id: String,

    /// HTTP method (GET, POST, etc.)
    pub method: Method,

    /// Request URI including path and query parameters
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Request body; `Bytes` clones are cheap
    pub body: Bytes,

    /// Client's remote address, when the connection exposes one
    pub remote_addr: Option<SocketAddr>,

    /// Timestamp when the request was received
    pub received_at: Instant,
}

impl IncomingRequest {
    /// Create a new incoming request with a generated ID
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            uri,
            headers,
            body,
            remote_addr,
            received_at: Instant::now(),
        }
    }

    /// Get the request path without query parameters
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get query parameters as a string
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// IP of the connected peer, `None` when there is no remote address
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    /// Host the client addressed, without port
    ///
    /// Bracketed IPv6 hosts keep their brackets: `[::1]:8080` yields `[::1]`.
    pub fn host(&self) -> Option<&str> {
        self.uri.host().or_else(|| self.header("host")).map(strip_port)
    }

    /// Decoded query parameters; keys without a value map to an empty string
    pub fn query_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();

        if let Some(query) = self.query() {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if let (Ok(key), Ok(value)) = (urlencoding::decode(key), urlencoding::decode(value)) {
                    params.insert(key.into_owned(), value.into_owned());
                }
            }
        }

        params
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

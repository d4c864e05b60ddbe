//! # Route Predicates
//!
//! A stored `PredicateDefinition` is just a name and string arguments. Before a route
//! enters the route table each definition is compiled into a `RoutePredicate` so that
//! patterns, regexes and timestamps are parsed once instead of per request.
//!
//! | Name         | Arguments                         |
//! |--------------|-----------------------------------|
//! | `Path`       | one or more Ant patterns          |
//! | `Method`     | HTTP methods (`GET,POST` allowed) |
//! | `Host`       | host patterns                     |
//! | `Header`     | header name, optional regex       |
//! | `Query`      | parameter name, optional regex    |
//! | `RemoteAddr` | IPs or CIDR blocks                |
//! | `After`      | RFC 3339 timestamp                |
//! | `Before`     | RFC 3339 timestamp                |
//! | `Between`    | two RFC 3339 timestamps           |
//!
//! Regex arguments must match the whole value.

use axum::http::Method;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

use super::pattern::{compile_host_pattern, PathPattern};
use crate::core::ip::IpBlock;
use crate::core::types::IncomingRequest;
use crate::rules::PredicateDefinition;

/// A compiled route predicate
#[derive(Debug, Clone)]
pub enum RoutePredicate {
    Path(Vec<PathPattern>),
    Method(Vec<Method>),
    Host(Vec<Regex>),
    Header { name: String, pattern: Option<Regex> },
    Query { param: String, pattern: Option<Regex> },
    RemoteAddr(Vec<IpBlock>),
    After(DateTime<Utc>),
    Before(DateTime<Utc>),
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl RoutePredicate {
    /// Parse a stored definition
    pub fn compile(definition: &PredicateDefinition) -> Result<Self, String> {
        let args: Vec<&str> = definition
            .args
            .iter()
            .map(|arg| arg.trim())
            .filter(|arg| !arg.is_empty())
            .collect();

        match definition.name.as_str() {
            "Path" => {
                require_args(&definition.name, &args, 1)?;
                let patterns = args
                    .iter()
                    .map(|arg| PathPattern::compile(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Path(patterns))
            }
            "Method" => {
                let methods = split_list(&args)
                    .into_iter()
                    .map(|method| {
                        Method::from_str(&method.to_uppercase())
                            .map_err(|_| format!("'{}' is not an HTTP method", method))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                require_args(&definition.name, &methods, 1)?;
                Ok(Self::Method(methods))
            }
            "Host" => {
                let hosts = split_list(&args)
                    .into_iter()
                    .map(compile_host_pattern)
                    .collect::<Result<Vec<_>, _>>()?;
                require_args(&definition.name, &hosts, 1)?;
                Ok(Self::Host(hosts))
            }
            "Header" => {
                require_args(&definition.name, &args, 1)?;
                Ok(Self::Header {
                    name: args[0].to_ascii_lowercase(),
                    pattern: optional_regex(args.get(1))?,
                })
            }
            "Query" => {
                require_args(&definition.name, &args, 1)?;
                Ok(Self::Query {
                    param: args[0].to_string(),
                    pattern: optional_regex(args.get(1))?,
                })
            }
            "RemoteAddr" => {
                let blocks = split_list(&args)
                    .into_iter()
                    .map(IpBlock::from_str)
                    .collect::<Result<Vec<_>, _>>()?;
                require_args(&definition.name, &blocks, 1)?;
                Ok(Self::RemoteAddr(blocks))
            }
            "After" => {
                require_args(&definition.name, &args, 1)?;
                Ok(Self::After(parse_time(args[0])?))
            }
            "Before" => {
                require_args(&definition.name, &args, 1)?;
                Ok(Self::Before(parse_time(args[0])?))
            }
            "Between" => {
                require_args(&definition.name, &args, 2)?;
                let start = parse_time(args[0])?;
                let end = parse_time(args[1])?;
                if start > end {
                    return Err("Between start must not be after its end".to_string());
                }
                Ok(Self::Between(start, end))
            }
            other => Err(format!("unknown predicate '{}'", other)),
        }
    }

    /// Evaluate against a request
    ///
    /// A matching `Path` predicate adds its `{name}` captures to `path_vars`.
    pub fn test(&self, request: &IncomingRequest, now: DateTime<Utc>, path_vars: &mut HashMap<String, String>) -> bool {
        match self {
            Self::Path(patterns) => {
                for pattern in patterns {
                    if let Some(captures) = pattern.captures(request.path()) {
                        path_vars.extend(captures);
                        return true;
                    }
                }
                false
            }
            Self::Method(methods) => methods.contains(&request.method),
            Self::Host(hosts) => match request.host() {
                Some(host) => hosts.iter().any(|pattern| pattern.is_match(host)),
                None => false,
            },
            Self::Header { name, pattern } => {
                let mut values = request.headers.get_all(name.as_str()).iter();
                match pattern {
                    Some(pattern) => values.any(|value| {
                        value
                            .to_str()
                            .map(|value| pattern.is_match(value))
                            .unwrap_or(false)
                    }),
                    None => values.next().is_some(),
                }
            }
            Self::Query { param, pattern } => match request.query_params().get(param) {
                Some(value) => pattern.as_ref().map(|p| p.is_match(value)).unwrap_or(true),
                None => false,
            },
            Self::RemoteAddr(blocks) => match request.client_ip() {
                Some(ip) => blocks.iter().any(|block| block.contains(&ip)),
                None => false,
            },
            Self::After(at) => now > *at,
            Self::Before(at) => now < *at,
            Self::Between(start, end) => now > *start && now < *end,
        }
    }
}

fn require_args<T>(name: &str, args: &[T], min: usize) -> Result<(), String> {
    if args.len() < min {
        return Err(format!("{} needs at least {} argument(s)", name, min));
    }
    Ok(())
}

/// Accept both `["GET", "POST"]` and `["GET,POST"]`
fn split_list<'a>(args: &[&'a str]) -> Vec<&'a str> {
    args.iter()
        .copied()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn optional_regex(arg: Option<&&str>) -> Result<Option<Regex>, String> {
    match arg {
        Some(source) => Regex::new(&format!("^(?:{})$", source))
            .map(Some)
            .map_err(|e| format!("invalid regex '{}': {}", source, e)),
        None => Ok(None),
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}

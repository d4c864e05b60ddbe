//! # Path and Host Patterns
//!
//! Route `Path` predicates and blacklist rule paths use Ant-style patterns:
//!
//! | Pattern        | Matches                                   |
//! |----------------|-------------------------------------------|
//! | `?`            | one character inside a segment            |
//! | `*`            | zero or more characters inside a segment  |
//! | `**`           | zero or more whole segments               |
//! | `{id}`         | one segment, captured as `id`             |
//! | `{id:[0-9]+}`  | one segment matching the regex            |
//! | `\*`           | a literal `*` (any character after `\`)   |
//!
//! A pattern without any of these matches only the identical path. Patterns compile
//! to an anchored `regex::Regex` once and are reused for every request.
//!
//! `Host` predicates use the same wildcards with `.` as separator.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Compiled Ant-style path pattern
#[derive(Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
    variables: Vec<String>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        if pattern.trim().is_empty() {
            return Err("path pattern must not be empty".to_string());
        }

        let mut source = String::from("^");
        let mut variables = Vec::new();

        for (index, segment) in pattern.split('/').enumerate() {
            if index == 0 {
                // Leading slash shows up as an empty first segment
                if segment == "**" {
                    source.push_str(".*");
                } else if !segment.is_empty() {
                    source.push_str(&segment_regex(segment, &mut variables)?);
                }
                continue;
            }

            if segment == "**" {
                source.push_str("(?:/.*)?");
            } else {
                source.push('/');
                source.push_str(&segment_regex(segment, &mut variables)?);
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| format!("invalid path pattern '{}': {}", pattern, e))?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
            variables,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pattern source that matches `path` and nothing else
    pub fn literal(path: &str) -> String {
        let mut out = String::with_capacity(path.len());
        for c in path.chars() {
            if matches!(c, '*' | '?' | '{' | '}' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match and extract `{name}` variables
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut vars = HashMap::with_capacity(self.variables.len());
        for name in &self.variables {
            if let Some(value) = captures.name(name) {
                vars.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(vars)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.raw).finish()
    }
}

/// Translate one path segment into regex source
fn segment_regex(segment: &str, variables: &mut Vec<String>) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                let mut body = String::new();
                let mut depth = 1;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    body.push(c);
                }
                if depth != 0 {
                    return Err(format!("unclosed '{{' in path segment '{}'", segment));
                }

                let (name, constraint) = match body.split_once(':') {
                    Some((name, constraint)) => (name, constraint),
                    None => (body.as_str(), "[^/]+"),
                };
                if !is_identifier(name) {
                    return Err(format!("invalid variable name '{}' in path segment '{}'", name, segment));
                }
                if variables.iter().any(|existing| existing == name) {
                    return Err(format!("variable '{}' appears more than once", name));
                }
                variables.push(name.to_string());
                out.push_str(&format!("(?P<{}>{})", name, constraint));
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Compile a host pattern such as `**.example.org` or `api-?.example.org`
///
/// Hosts are matched case-insensitively.
pub fn compile_host_pattern(pattern: &str) -> Result<Regex, String> {
    if pattern.trim().is_empty() {
        return Err("host pattern must not be empty".to_string());
    }

    let mut source = String::from("(?i)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                source.push_str(".*");
            }
            '*' => source.push_str("[^.]*"),
            '?' => source.push_str("[^.]"),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| format!("invalid host pattern '{}': {}", pattern, e))
}

//! Path patterns.
//!
//! # Responsibilities
//! - Compile configured patterns once at startup
//! - Match a request path against a single pattern
//!
//! # Design Decisions
//! - Path-only: no header, method, or body inspection
//! - Every kind of pattern is anchored at the start of the path
//! - Matching is case-sensitive

use regex::Regex;

use crate::config::RouteConfig;

/// A compiled proxy rule.
#[derive(Debug, Clone)]
pub enum RouteRule {
    /// Regular expression anchored at the path start.
    Regex(Regex),
    /// Literal prefix.
    Prefix(String),
    /// Literal full path.
    Exact(String),
}

impl RouteRule {
    /// Compile a configured pattern.
    ///
    /// Every regex is wrapped as `^(?:pattern)`, so no alternative can match
    /// mid-path: `/token` never matches `/static/token`, with or without a
    /// leading `^`.
    pub fn compile(config: &RouteConfig) -> Result<Self, regex::Error> {
        Ok(match config {
            RouteConfig::Regex(pattern) => {
                RouteRule::Regex(Regex::new(&format!("^(?:{pattern})"))?)
            }
            RouteConfig::Prefix(prefix) => RouteRule::Prefix(prefix.clone()),
            RouteConfig::Exact(path) => RouteRule::Exact(path.clone()),
        })
    }

    /// Returns true if `path` matches this rule.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RouteRule::Regex(re) => re.is_match(path),
            RouteRule::Prefix(prefix) => path.starts_with(prefix.as_str()),
            RouteRule::Exact(exact) => path == exact,
        }
    }
}

impl std::fmt::Display for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteRule::Regex(re) => write!(f, "regex {}", re.as_str()),
            RouteRule::Prefix(p) => write!(f, "prefix {p}"),
            RouteRule::Exact(p) => write!(f, "exact {p}"),
        }
    }
}

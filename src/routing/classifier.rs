//! Request path classification.
//!
//! # Responsibilities
//! - Store compiled rules in declaration order
//! - Decide whether a path is proxied or served locally
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan; first match wins
//! - No match falls back to local serving

use crate::config::RouteConfig;
use crate::routing::rule::RouteRule;

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Forward to the upstream backend.
    Proxy,
    /// Serve from the build pipeline (or the live update endpoint).
    LocalServe,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Proxy => "proxy",
            Classification::LocalServe => "local",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered rule list deciding between [`Classification::Proxy`] and
/// [`Classification::LocalServe`].
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<RouteRule>,
}

impl Classifier {
    /// Build a classifier from already compiled rules.
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// Compile configured patterns, failing on the first invalid one.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, (String, regex::Error)> {
        let rules = routes
            .iter()
            .map(|r| RouteRule::compile(r).map_err(|e| (r.pattern().to_string(), e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Classify a request path.
    pub fn classify(&self, path: &str) -> Classification {
        self.classify_with_rule(path).0
    }

    /// Classify a request path, also returning the index of the rule that
    /// matched.
    pub fn classify_with_rule(&self, path: &str) -> (Classification, Option<usize>) {
        match self.rules.iter().position(|rule| rule.matches(path)) {
            Some(index) => (Classification::Proxy, Some(index)),
            None => (Classification::LocalServe, None),
        }
    }

    /// Compiled rules in evaluation order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

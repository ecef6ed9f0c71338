//! Rate limit rules configuration and route classification.
//!
//! Requests are classified by path prefix. Each route class carries its own
//! ceiling, window, key strategy and store-failure mode. The longest
//! matching prefix wins; requests that match no prefix fall back to the
//! default class.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{GuardError, Result};

/// How the identity key for a request is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    /// Authenticated user id when present, network address otherwise
    #[default]
    ByUser,
    /// Always the client network address
    ByNetworkAddress,
}

/// What to do when the counter store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Let the request through without rate limit headers
    #[default]
    Open,
    /// Reject the request with 503
    Closed,
}

/// A rate limit rule for one route class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Name of the route class, used in counter keys, logs and metrics
    pub class: String,
    /// Path prefix this rule applies to (ignored for the default rule)
    #[serde(default)]
    pub prefix: String,
    /// Maximum requests per window
    pub ceiling: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// How to derive the identity key
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    /// Behavior when the counter store is unavailable
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl RouteRule {
    /// Create a rule for a path prefix.
    pub fn new(class: &str, prefix: &str, ceiling: u64, window_secs: u64) -> Self {
        Self {
            class: class.to_string(),
            prefix: prefix.to_string(),
            ceiling,
            window_secs,
            key_strategy: KeyStrategy::default(),
            fail_mode: FailMode::default(),
        }
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// The prefix without surrounding slashes.
    fn normalized_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    /// Check whether a path (without its leading slash) falls under this rule.
    ///
    /// A prefix matches itself and anything below it, so `api` matches
    /// `api` and `api/members` but not `apiary`.
    fn matches(&self, path: &str) -> bool {
        let prefix = self.normalized_prefix();
        if prefix.is_empty() {
            return false;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.class.trim().is_empty() {
            return Err(GuardError::Config("rate limit class name must not be empty".into()));
        }
        if self.ceiling == 0 {
            return Err(GuardError::Config(format!(
                "rate limit class '{}' has a zero ceiling",
                self.class
            )));
        }
        if self.window_secs == 0 {
            return Err(GuardError::Config(format!(
                "rate limit class '{}' has a zero window",
                self.class
            )));
        }
        Ok(())
    }
}

/// The complete set of rate limit rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Prefix-matched route classes
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,

    /// Rule applied when no prefix matches
    #[serde(default = "default_fallback")]
    pub fallback: RouteRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            routes: default_routes(),
            fallback: default_fallback(),
        }
    }
}

fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule::new("auth", "auth", 5, 60)
            .with_key_strategy(KeyStrategy::ByNetworkAddress)
            .with_fail_mode(FailMode::Closed),
        RouteRule::new("api", "api", 60, 60),
    ]
}

fn default_fallback() -> RouteRule {
    RouteRule::new("default", "", 100, 60)
}

impl RateLimitRules {
    /// Parse rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Find the rule for a request path.
    pub fn classify(&self, path: &str) -> &RouteRule {
        let path = path.trim_start_matches('/');
        self.routes
            .iter()
            .filter(|rule| rule.matches(path))
            .max_by_key(|rule| rule.normalized_prefix().len())
            .unwrap_or(&self.fallback)
    }

    /// Reject zero ceilings or windows, empty prefixes and duplicate prefixes.
    pub fn validate(&self) -> Result<()> {
        self.fallback.validate()?;

        let mut seen = HashSet::new();
        for rule in &self.routes {
            rule.validate()?;
            let prefix = rule.normalized_prefix();
            if prefix.is_empty() {
                return Err(GuardError::Config(format!(
                    "rate limit class '{}' has an empty prefix",
                    rule.class
                )));
            }
            if !seen.insert(prefix.to_string()) {
                return Err(GuardError::Config(format!(
                    "duplicate rate limit prefix '{}'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

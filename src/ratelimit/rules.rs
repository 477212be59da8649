//! Rate limit rule configuration and applicability matching.
//!
//! Rules are created by an administrative action, validated once at creation
//! time, and read-mostly afterwards. The resolver caches them; the evaluation
//! path assumes they are valid.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::algorithms::Algorithm;
use crate::error::{GatewayError, Result};

/// The dimension a rate-limit rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    ApiKey,
    User,
    Ip,
    Endpoint,
}

/// An endpoint pattern, compiled once at rule creation. A pattern matches by
/// path prefix, or by regex. Patterns that do not compile as a regex are
/// rejected outright, so the evaluation path never compiles or re-validates.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    raw: String,
    regex: Regex,
}

impl EndpointPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(GatewayError::Configuration(
                "endpoint pattern must not be empty".to_string(),
            ));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            GatewayError::Configuration(format!(
                "endpoint pattern '{}' is not a valid regex: {}",
                pattern, e
            ))
        })?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Prefix match first, regex otherwise.
    pub fn matches(&self, endpoint: &str) -> bool {
        endpoint.starts_with(self.raw.as_str()) || self.regex.is_match(endpoint)
    }
}

impl Serialize for EndpointPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for EndpointPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EndpointPattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// A rate limit rule: immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Unique rule identifier
    pub id: String,
    /// Admission algorithm to apply
    pub algorithm: Algorithm,
    /// Maximum requests (or bucket capacity) per window
    pub quota: u64,
    /// Window duration in milliseconds
    pub window_ms: u64,
    /// Scope the rule applies to
    pub scope: RuleScope,
    /// Endpoint patterns the rule applies to (empty = all endpoints)
    #[serde(default)]
    pub endpoint_patterns: Vec<EndpointPattern>,
    /// HTTP methods the rule applies to, case-insensitive (empty = all)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Higher priority rules are evaluated first
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are skipped by the resolver
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RateLimitRule {
    /// Validate the rule at creation time.
    ///
    /// Evaluation assumes valid input, so a zero quota or window must never
    /// reach the algorithm functions. Endpoint patterns carry their own
    /// validity: [`EndpointPattern`] cannot be constructed from an empty or
    /// uncompilable pattern.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(GatewayError::Configuration(
                "rule id must not be empty".to_string(),
            ));
        }
        if self.quota == 0 {
            return Err(GatewayError::Configuration(format!(
                "rule '{}': quota must be positive",
                self.id
            )));
        }
        if self.window_ms == 0 {
            return Err(GatewayError::Configuration(format!(
                "rule '{}': window_ms must be positive",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the rule applies to the given request endpoint and method.
    pub fn applies_to(&self, endpoint: &str, method: &str) -> bool {
        if !self.enabled {
            return false;
        }

        if !self.endpoint_patterns.is_empty() {
            let matched = self.endpoint_patterns.iter().any(|p| p.matches(endpoint));
            if !matched {
                return false;
            }
        }

        if !self.methods.is_empty() {
            let matched = self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
            if !matched {
                return false;
            }
        }

        true
    }
}

//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};

/// Main configuration for the admission-control core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Pipeline configuration (size limits, method allow-list, CORS, DDoS)
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Default circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// HTTP methods the gateway accepts at all
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// CORS response header configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// DDoS heuristic configuration
    #[serde(default)]
    pub ddos: DdosConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            allowed_methods: default_allowed_methods(),
            cors: CorsConfig::default(),
            ddos: DdosConfig::default(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// CORS response header configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origin")]
    pub allowed_origin: String,

    #[serde(default = "default_cors_methods")]
    pub allowed_methods: String,

    #[serde(default = "default_cors_headers")]
    pub allowed_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: default_cors_origin(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
        }
    }
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_cors_methods() -> String {
    "GET, POST, PUT, PATCH, DELETE, OPTIONS".to_string()
}

fn default_cors_headers() -> String {
    "Content-Type, Authorization, X-Api-Key".to_string()
}

/// DDoS heuristic: a dedicated high-threshold fixed window applied to the
/// caller's IP before authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdosConfig {
    /// Requests allowed per IP per window
    #[serde(default = "default_ddos_quota")]
    pub quota: u64,

    /// Window duration in milliseconds
    #[serde(default = "default_ddos_window_ms")]
    pub window_ms: u64,

    /// IPs exempt from the heuristic
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            quota: default_ddos_quota(),
            window_ms: default_ddos_window_ms(),
            ip_whitelist: Vec::new(),
        }
    }
}

fn default_ddos_quota() -> u64 {
    1000
}

fn default_ddos_window_ms() -> u64 {
    60_000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Resolved-rule cache TTL in seconds
    #[serde(default = "default_rule_cache_ttl")]
    pub rule_cache_ttl_secs: u64,

    /// Process-local state cache TTL in seconds
    #[serde(default = "default_state_cache_ttl")]
    pub state_cache_ttl_secs: u64,

    /// Durable state retention in seconds
    #[serde(default = "default_state_retention")]
    pub state_retention_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rule_cache_ttl_secs: default_rule_cache_ttl(),
            state_cache_ttl_secs: default_state_cache_ttl(),
            state_retention_secs: default_state_retention(),
        }
    }
}

fn default_rule_cache_ttl() -> u64 {
    300
}

fn default_state_cache_ttl() -> u64 {
    60
}

fn default_state_retention() -> u64 {
    86_400
}

/// Circuit breaker configuration, applied per guarded dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the monitoring window before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes before the circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Sliding window for failure counting, in milliseconds
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,

    /// Time the circuit stays open before probing, in milliseconds
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Per-call timeout, in milliseconds. Independent of (and normally
    /// shorter than) the recovery timeout.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            monitoring_window_ms: default_monitoring_window_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_monitoring_window_ms() -> u64 {
    60_000
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl GatewayConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::GatewayError::Configuration(e.to_string()))?;
        Ok(config)
    }
}

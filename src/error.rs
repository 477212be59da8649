//! Error types for the Gatekeeper core.

use thiserror::Error;

/// Main error type for admission-control operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid rate-limit rule or gateway configuration. Rejected at
    /// creation time; never reaches evaluation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A rate limit denied the request.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the caller may retry.
        retry_after_secs: u64,
        /// Epoch milliseconds at which the limit resets.
        reset_at_ms: i64,
        /// The rule that denied the request.
        rule_id: String,
    },

    /// The presented API key failed validation.
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    /// The API key is valid but not permitted for this endpoint/method/IP.
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    /// A circuit is open and no fallback was configured.
    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },

    /// A guarded call exceeded its timeout. Counts as a failure for the
    /// owning circuit breaker.
    #[error("Call to dependency '{dependency}' timed out after {timeout_ms}ms")]
    Timeout { dependency: String, timeout_ms: u64 },

    /// A failure from the rule store, state store, or key store.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Request exceeded the configured size limit.
    #[error("Request body too large: {size} bytes (max {max})")]
    RequestTooLarge { size: usize, max: usize },

    /// Request method is not in the gateway's allow-list.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// I/O errors (configuration file loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status code for the error response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Configuration(_) => 500,
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::InvalidApiKey(_) => 401,
            GatewayError::InsufficientPermissions(_) => 403,
            GatewayError::CircuitOpen { .. } => 503,
            GatewayError::Timeout { .. } => 504,
            GatewayError::Dependency(_) => 502,
            GatewayError::RequestTooLarge { .. } => 413,
            GatewayError::MethodNotAllowed(_) => 405,
            GatewayError::Io(_) => 500,
        }
    }
}

/// Result type alias for admission-control operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

//! Request, decision, and event types crossing the pipeline boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An inbound request as seen by the admission pipeline. HTTP framing is the
/// caller's concern; this is the already-parsed envelope.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    /// Caller IP, used as the identifier for anonymous and DDoS checks
    pub ip: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Raw API key as presented, if any
    pub api_key: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: &str, path: &str, ip: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ip: ip.to_string(),
            headers: HashMap::new(),
            body: None,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, raw: &str) -> Self {
        self.api_key = Some(raw.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn body_size(&self) -> usize {
        self.body.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}

/// Lifecycle status of an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Suspended,
    Expired,
}

/// A validated API key, read-only to the admission core. Supplies the
/// identifier for key-scoped rate limits and the declared allowances for the
/// permission pre-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Endpoint prefixes the key may call (empty = all)
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
    /// Methods the key may use (empty = all)
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// Source IPs the key may be used from (empty = any)
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    pub status: KeyStatus,
}

impl ApiKey {
    /// Check the key's declared allowances against a request. Returns the
    /// denial reason, if any.
    pub fn permits(&self, endpoint: &str, method: &str, ip: &str) -> Result<(), String> {
        if !self.allowed_endpoints.is_empty()
            && !self.allowed_endpoints.iter().any(|p| endpoint.starts_with(p.as_str()))
        {
            return Err(format!("endpoint '{}' not allowed for key", endpoint));
        }
        if !self.allowed_methods.is_empty()
            && !self
                .allowed_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
        {
            return Err(format!("method '{}' not allowed for key", method));
        }
        if !self.ip_whitelist.is_empty() && !self.ip_whitelist.iter().any(|w| w == ip) {
            return Err(format!("ip '{}' not in key whitelist", ip));
        }
        Ok(())
    }
}

/// The pipeline's verdict for one request.
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    pub allow: bool,
    pub status_code: u16,
    /// Correlation id, echoed in `X-Request-ID`
    pub request_id: String,
    /// The identifier the request was rate-limited against (key id or IP)
    pub identifier: String,
    /// Remaining quota under the most restrictive applicable rule. `None`
    /// when no finite quota applies (including fail-open).
    pub remaining: Option<u64>,
    pub reset_at_ms: Option<i64>,
    /// Set only on 429
    pub retry_after_secs: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub reason: Option<String>,
}

/// What a wrapped handler returns on success.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: String,
}

impl HandlerResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status_code: 200,
            body: body.to_string(),
        }
    }
}

/// Usage record emitted per request, fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub request_id: String,
    pub identifier: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub request_bytes: usize,
    pub response_bytes: usize,
    pub timestamp_ms: i64,
}

/// Security alert raised by the signature scan, fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub request_id: String,
    pub ip: String,
    pub endpoint: String,
    /// Signature category, e.g. "path_traversal"
    pub category: String,
    /// The matched signature
    pub pattern: String,
    pub timestamp_ms: i64,
}

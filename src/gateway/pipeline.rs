//! The admission pipeline.
//!
//! `admit` runs the ordered pre-handler steps for one request: CORS
//! preflight, size and method checks, the DDoS heuristic, API key
//! authentication and permission checks, and the rate-limit check. `handle`
//! wraps a handler with the full pipeline, recording usage and scanning for
//! attack signatures after the response is composed. Handler-initiated calls
//! to volatile dependencies go through the shared breaker registry.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::request::{
    AdmissionDecision, ApiKey, GatewayRequest, HandlerResponse, SecurityAlert, UsageEvent,
};
use super::security::SecurityScanner;
use crate::breaker::BreakerRegistry;
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::ratelimit::algorithms::Algorithm;
use crate::ratelimit::limiter::{RateLimitDecision, RateLimiter};
use crate::ratelimit::resolver::RuleResolver;
use crate::ratelimit::rules::{RateLimitRule, RuleScope};
use crate::ratelimit::state::StateCache;
use crate::stores::{AlertSink, KeyStore, RuleStore, StateStore, UsageSink};

/// Response envelope returned by [`Gateway::handle`].
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// The per-request orchestrator.
pub struct Gateway {
    config: GatewayConfig,
    resolver: Arc<RuleResolver>,
    limiter: Arc<RateLimiter>,
    key_store: Arc<dyn KeyStore>,
    usage_sink: Arc<dyn UsageSink>,
    alert_sink: Arc<dyn AlertSink>,
    breakers: Arc<BreakerRegistry>,
    scanner: SecurityScanner,
    ddos_rule: RateLimitRule,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        rule_store: Arc<dyn RuleStore>,
        state_store: Arc<dyn StateStore>,
        key_store: Arc<dyn KeyStore>,
        usage_sink: Arc<dyn UsageSink>,
        alert_sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(RuleResolver::new(
            rule_store.clone(),
            clock.clone(),
            &config.rate_limiting,
        ));
        // Rule creates and updates invalidate the resolved-rule cache
        // eagerly instead of waiting out the TTL.
        let hook_resolver = resolver.clone();
        rule_store.set_change_hook(Arc::new(move || hook_resolver.invalidate()));
        let state_cache = Arc::new(StateCache::new(
            state_store,
            clock.clone(),
            &config.rate_limiting,
        ));
        let limiter = Arc::new(RateLimiter::new(
            resolver.clone(),
            state_cache,
            clock.clone(),
        ));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone(), clock.clone()));

        // The DDoS heuristic runs outside the resolver against a dedicated
        // high-threshold rule keyed by caller IP.
        let ddos_rule = RateLimitRule {
            id: "ddos-heuristic".to_string(),
            algorithm: Algorithm::FixedWindow,
            quota: config.pipeline.ddos.quota,
            window_ms: config.pipeline.ddos.window_ms,
            scope: RuleScope::Ip,
            endpoint_patterns: Vec::new(),
            methods: Vec::new(),
            priority: i32::MAX,
            enabled: true,
        };

        info!(
            ddos_quota = config.pipeline.ddos.quota,
            rule_cache_ttl_secs = config.rate_limiting.rule_cache_ttl_secs,
            "Admission pipeline initialized"
        );

        Self {
            config,
            resolver,
            limiter,
            key_store,
            usage_sink,
            alert_sink,
            breakers,
            scanner: SecurityScanner::new(),
            ddos_rule,
            clock,
        }
    }

    /// Rule resolver, exposed so administrative actions can invalidate the
    /// cached rule sets after creating or updating a rule.
    pub fn resolver(&self) -> &Arc<RuleResolver> {
        &self.resolver
    }

    /// Shared breaker registry. Handlers use this to guard their own calls
    /// to volatile dependencies.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decide whether a request may proceed. Runs the pre-handler pipeline
    /// steps in order; the first failing step short-circuits.
    pub async fn admit(&self, req: &GatewayRequest) -> AdmissionDecision {
        let request_id = Uuid::new_v4().to_string();

        // CORS preflight never reaches the rate limiter.
        if req.method.eq_ignore_ascii_case("OPTIONS") {
            return self.allow_decision(request_id, 204, req.ip.clone(), None);
        }

        if req.body_size() > self.config.pipeline.max_body_bytes {
            let err = GatewayError::RequestTooLarge {
                size: req.body_size(),
                max: self.config.pipeline.max_body_bytes,
            };
            return self.deny_decision(request_id, req.ip.clone(), None, &err);
        }

        if !self
            .config
            .pipeline
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&req.method))
        {
            let err = GatewayError::MethodNotAllowed(req.method.clone());
            return self.deny_decision(request_id, req.ip.clone(), None, &err);
        }

        // DDoS heuristic: per-IP high-threshold window, whitelisted IPs skip.
        if !self
            .config
            .pipeline
            .ddos
            .ip_whitelist
            .iter()
            .any(|ip| ip == &req.ip)
        {
            // Namespaced identifier keeps the heuristic's window separate
            // from any fixed-window rule tracking the same IP.
            let ddos_id = format!("ddos:{}", req.ip);
            let ddos = self.limiter.check_rule(&self.ddos_rule, &ddos_id, 1).await;
            if !ddos.allowed {
                warn!(ip = %req.ip, "DDoS heuristic tripped");
                self.record_denied_usage(req, &request_id, &req.ip).await;
                return self.rate_limited_decision(request_id, req.ip.clone(), &ddos);
            }
        }

        // Authentication and permission pre-check, delegated to the key
        // store behind its own breaker.
        let api_key = match &req.api_key {
            Some(raw) => match self.validate_key(raw).await {
                Ok(Some(key)) => {
                    if let Err(reason) = key.permits(&req.path, &req.method, &req.ip) {
                        let err = GatewayError::InsufficientPermissions(reason);
                        return self.deny_decision(request_id, key.id.clone(), None, &err);
                    }
                    Some(key)
                }
                Ok(None) => {
                    let err = GatewayError::InvalidApiKey("unknown or inactive key".to_string());
                    return self.deny_decision(request_id, req.ip.clone(), None, &err);
                }
                Err(e) => {
                    warn!(error = %e, "API key validation unavailable");
                    return self.deny_decision(request_id, req.ip.clone(), None, &e);
                }
            },
            None => None,
        };

        let identifier = api_key
            .as_ref()
            .map(|k| k.id.clone())
            .unwrap_or_else(|| req.ip.clone());
        let api_key_id = api_key.as_ref().map(|k| k.id.as_str());

        let decision = self
            .limiter
            .check(&req.path, &req.method, &identifier, api_key_id, 1)
            .await;

        if !decision.allowed {
            self.record_denied_usage(req, &request_id, &identifier).await;
            return self.rate_limited_decision(request_id, identifier, &decision);
        }

        debug!(
            request_id = %request_id,
            identifier = %identifier,
            remaining = ?decision.remaining,
            "Request admitted"
        );
        self.allow_decision(request_id, 200, identifier, Some(&decision))
    }

    /// Run the full pipeline around `handler`. Usage recording and the
    /// security scan are fire-and-forget; their failures never reach the
    /// caller.
    pub async fn handle<F, Fut>(&self, req: &GatewayRequest, handler: F) -> GatewayResponse
    where
        F: FnOnce(GatewayRequest) -> Fut,
        Fut: Future<Output = Result<HandlerResponse>>,
    {
        let started_ms = self.clock.now_ms();
        let decision = self.admit(req).await;

        if !decision.allow {
            return GatewayResponse {
                status_code: decision.status_code,
                body: error_body(&decision),
                headers: decision.headers,
            };
        }

        // Preflight responses never reach the handler.
        if decision.status_code == 204 {
            return GatewayResponse {
                status_code: 204,
                headers: decision.headers,
                body: String::new(),
            };
        }

        let (status_code, body) = match handler(req.clone()).await {
            Ok(resp) => (resp.status_code, resp.body),
            Err(e) => {
                warn!(request_id = %decision.request_id, error = %e, "Handler failed");
                (
                    e.status_code(),
                    serde_json::json!({
                        "error": e.to_string(),
                        "request_id": decision.request_id,
                    })
                    .to_string(),
                )
            }
        };

        let latency_ms = (self.clock.now_ms() - started_ms).max(0) as u64;
        self.spawn_usage(UsageEvent {
            request_id: decision.request_id.clone(),
            identifier: decision.identifier.clone(),
            endpoint: req.path.clone(),
            method: req.method.clone(),
            status_code,
            latency_ms,
            request_bytes: req.body_size(),
            response_bytes: body.len(),
            timestamp_ms: self.clock.now_ms(),
        });

        if let Some((category, pattern)) = self.scanner.scan(&req.path, req.body.as_deref()) {
            self.spawn_alert(SecurityAlert {
                request_id: decision.request_id.clone(),
                ip: req.ip.clone(),
                endpoint: req.path.clone(),
                category,
                pattern,
                timestamp_ms: self.clock.now_ms(),
            });
        }

        GatewayResponse {
            status_code,
            headers: decision.headers,
            body,
        }
    }

    async fn validate_key(&self, raw: &str) -> Result<Option<ApiKey>> {
        let key_store = self.key_store.clone();
        let raw = raw.to_string();
        self.breakers
            .guard("api-key-store", move || async move {
                key_store.validate_key(&raw).await
            })
            .await
    }

    fn allow_decision(
        &self,
        request_id: String,
        status_code: u16,
        identifier: String,
        limit: Option<&RateLimitDecision>,
    ) -> AdmissionDecision {
        let mut decision = AdmissionDecision {
            allow: true,
            status_code,
            request_id,
            identifier,
            remaining: limit.and_then(|d| d.remaining),
            reset_at_ms: limit.and_then(|d| d.reset_at_ms),
            retry_after_secs: None,
            headers: Vec::new(),
            reason: None,
        };
        decision.headers = self.compose_headers(&decision);
        decision
    }

    fn deny_decision(
        &self,
        request_id: String,
        identifier: String,
        limit: Option<&RateLimitDecision>,
        error: &GatewayError,
    ) -> AdmissionDecision {
        let mut decision = AdmissionDecision {
            allow: false,
            status_code: error.status_code(),
            request_id,
            identifier,
            remaining: limit.and_then(|d| d.remaining),
            reset_at_ms: limit.and_then(|d| d.reset_at_ms),
            retry_after_secs: limit.and_then(|d| d.retry_after_secs),
            headers: Vec::new(),
            reason: Some(error.to_string()),
        };
        decision.headers = self.compose_headers(&decision);
        decision
    }

    fn rate_limited_decision(
        &self,
        request_id: String,
        identifier: String,
        limit: &RateLimitDecision,
    ) -> AdmissionDecision {
        let err = GatewayError::RateLimitExceeded {
            retry_after_secs: limit.retry_after_secs.unwrap_or(1),
            reset_at_ms: limit.reset_at_ms.unwrap_or(0),
            rule_id: limit.rule_id.clone().unwrap_or_default(),
        };
        self.deny_decision(request_id, identifier, Some(limit), &err)
    }

    fn compose_headers(&self, decision: &AdmissionDecision) -> Vec<(String, String)> {
        let cors = &self.config.pipeline.cors;
        let mut headers = vec![
            ("X-Request-ID".to_string(), decision.request_id.clone()),
            (
                "Access-Control-Allow-Origin".to_string(),
                cors.allowed_origin.clone(),
            ),
            (
                "Access-Control-Allow-Methods".to_string(),
                cors.allowed_methods.clone(),
            ),
            (
                "Access-Control-Allow-Headers".to_string(),
                cors.allowed_headers.clone(),
            ),
        ];
        if let Some(remaining) = decision.remaining {
            headers.push(("X-RateLimit-Remaining".to_string(), remaining.to_string()));
        }
        if let Some(reset_at_ms) = decision.reset_at_ms {
            headers.push((
                "X-RateLimit-Reset".to_string(),
                (reset_at_ms / 1000).to_string(),
            ));
        }
        if decision.status_code == 429 {
            if let Some(retry_after) = decision.retry_after_secs {
                headers.push(("Retry-After".to_string(), retry_after.to_string()));
            }
        }
        headers
    }

    /// Denied requests record usage before the error response is returned.
    async fn record_denied_usage(&self, req: &GatewayRequest, request_id: &str, identifier: &str) {
        let event = UsageEvent {
            request_id: request_id.to_string(),
            identifier: identifier.to_string(),
            endpoint: req.path.clone(),
            method: req.method.clone(),
            status_code: 429,
            latency_ms: 0,
            request_bytes: req.body_size(),
            response_bytes: 0,
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.usage_sink.record(event).await {
            warn!(error = %e, "Usage recording failed");
        }
    }

    fn spawn_usage(&self, event: UsageEvent) {
        let sink = self.usage_sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(event).await {
                warn!(error = %e, "Usage recording failed");
            }
        });
    }

    fn spawn_alert(&self, alert: SecurityAlert) {
        let sink = self.alert_sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.raise(alert).await {
                warn!(error = %e, "Security alert delivery failed");
            }
        });
    }
}

fn error_body(decision: &AdmissionDecision) -> String {
    serde_json::json!({
        "error": decision.reason,
        "request_id": decision.request_id,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gateway::request::KeyStatus;
    use crate::stores::memory::{
        BufferingAlertSink, BufferingUsageSink, MemoryKeyStore, MemoryRuleStore, MemoryStateStore,
    };
    use std::time::Duration;

    struct Fixture {
        gateway: Gateway,
        rules: Arc<MemoryRuleStore>,
        keys: Arc<MemoryKeyStore>,
        usage: Arc<BufferingUsageSink>,
        alerts: Arc<BufferingAlertSink>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: GatewayConfig) -> Fixture {
        let clock = ManualClock::new(0);
        let rules = Arc::new(MemoryRuleStore::new());
        let keys = Arc::new(MemoryKeyStore::new());
        let usage = Arc::new(BufferingUsageSink::new());
        let alerts = Arc::new(BufferingAlertSink::new());
        let states = Arc::new(MemoryStateStore::new(
            clock.clone(),
            config.rate_limiting.state_retention_secs,
        ));
        let gateway = Gateway::new(
            config,
            rules.clone(),
            states,
            keys.clone(),
            usage.clone(),
            alerts.clone(),
            clock.clone(),
        );
        Fixture {
            gateway,
            rules,
            keys,
            usage,
            alerts,
            clock,
        }
    }

    fn global_rule(id: &str, quota: u64) -> RateLimitRule {
        RateLimitRule {
            id: id.to_string(),
            algorithm: Algorithm::FixedWindow,
            quota,
            window_ms: 60_000,
            scope: RuleScope::Global,
            endpoint_patterns: Vec::new(),
            methods: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    fn active_key(id: &str) -> ApiKey {
        ApiKey {
            id: id.to_string(),
            scopes: Vec::new(),
            allowed_endpoints: Vec::new(),
            allowed_methods: Vec::new(),
            ip_whitelist: Vec::new(),
            status: KeyStatus::Active,
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_cors_preflight_short_circuits() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("OPTIONS", "/api/items", "1.2.3.4");

        let d = f.gateway.admit(&req).await;
        assert!(d.allow);
        assert_eq!(d.status_code, 204);
        assert_eq!(header(&d.headers, "Access-Control-Allow-Origin"), Some("*"));
        assert!(header(&d.headers, "X-Request-ID").is_some());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = GatewayConfig::default();
        config.pipeline.max_body_bytes = 8;
        let f = fixture(config);

        let req = GatewayRequest::new("POST", "/api/items", "1.2.3.4")
            .with_body("way past eight bytes");
        let d = f.gateway.admit(&req).await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 413);
    }

    #[tokio::test]
    async fn test_disallowed_method_rejected() {
        let mut config = GatewayConfig::default();
        config.pipeline.allowed_methods = vec!["GET".to_string()];
        let f = fixture(config);

        let d = f
            .gateway
            .admit(&GatewayRequest::new("DELETE", "/api/items", "1.2.3.4"))
            .await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 405);
    }

    #[tokio::test]
    async fn test_ddos_heuristic_denies_flooding_ip() {
        let mut config = GatewayConfig::default();
        config.pipeline.ddos.quota = 3;
        config.pipeline.ddos.ip_whitelist = vec!["10.0.0.1".to_string()];
        let f = fixture(config);

        for _ in 0..3 {
            assert!(f
                .gateway
                .admit(&GatewayRequest::new("GET", "/api", "203.0.113.9"))
                .await
                .allow);
        }
        let d = f
            .gateway
            .admit(&GatewayRequest::new("GET", "/api", "203.0.113.9"))
            .await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 429);
        // The denial was recorded before returning.
        assert_eq!(f.usage.events().len(), 1);
        assert_eq!(f.usage.events()[0].status_code, 429);

        // Whitelisted IPs bypass the heuristic entirely.
        for _ in 0..10 {
            assert!(f
                .gateway
                .admit(&GatewayRequest::new("GET", "/api", "10.0.0.1"))
                .await
                .allow);
        }
    }

    #[tokio::test]
    async fn test_invalid_api_key_rejected() {
        let f = fixture(GatewayConfig::default());
        let req =
            GatewayRequest::new("GET", "/api", "1.2.3.4").with_api_key("gk_live_nonexistent");
        let d = f.gateway.admit(&req).await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 401);
    }

    #[tokio::test]
    async fn test_permission_check_rejects_unlisted_endpoint() {
        let f = fixture(GatewayConfig::default());
        let mut key = active_key("key-1");
        key.allowed_endpoints = vec!["/api/weather".to_string()];
        f.keys.insert("gk_live_weather", key);

        let req =
            GatewayRequest::new("GET", "/api/admin", "1.2.3.4").with_api_key("gk_live_weather");
        let d = f.gateway.admit(&req).await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 403);
    }

    #[tokio::test]
    async fn test_key_id_is_the_rate_limit_identifier() {
        let f = fixture(GatewayConfig::default());
        f.rules.create_rule(global_rule("g", 1)).unwrap();
        f.keys.insert("gk_live_abcdef", active_key("key-1"));

        let keyed =
            GatewayRequest::new("GET", "/api", "1.2.3.4").with_api_key("gk_live_abcdef");
        assert!(f.gateway.admit(&keyed).await.allow);
        let d = f.gateway.admit(&keyed).await;
        assert!(!d.allow);
        assert_eq!(d.status_code, 429);
        assert!(header(&d.headers, "Retry-After").is_some());

        // The same source IP without the key tracks a separate identifier.
        let anonymous = GatewayRequest::new("GET", "/api", "1.2.3.4");
        assert!(f.gateway.admit(&anonymous).await.allow);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_on_allowed_response() {
        let f = fixture(GatewayConfig::default());
        f.rules.create_rule(global_rule("g", 5)).unwrap();

        let d = f
            .gateway
            .admit(&GatewayRequest::new("GET", "/api", "1.2.3.4"))
            .await;
        assert!(d.allow);
        assert_eq!(header(&d.headers, "X-RateLimit-Remaining"), Some("4"));
        assert!(header(&d.headers, "X-RateLimit-Reset").is_some());
        assert!(header(&d.headers, "Retry-After").is_none());
    }

    #[tokio::test]
    async fn test_rule_created_after_first_request_takes_effect_immediately() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("GET", "/api", "1.2.3.4");

        // First request caches an empty resolved-rule set.
        let d = f.gateway.admit(&req).await;
        assert!(d.allow);
        assert_eq!(d.remaining, None);

        // A rule created afterwards must be visible on the very next
        // request, not after the rule-cache TTL.
        f.rules.create_rule(global_rule("g", 1)).unwrap();
        let d = f.gateway.admit(&req).await;
        assert!(d.allow);
        assert_eq!(d.remaining, Some(0));
        assert!(!f.gateway.admit(&req).await.allow);
    }

    #[tokio::test]
    async fn test_window_reset_restores_quota() {
        let f = fixture(GatewayConfig::default());
        f.rules.create_rule(global_rule("g", 3)).unwrap();

        let req = GatewayRequest::new("GET", "/api", "1.2.3.4");
        for _ in 0..3 {
            assert!(f.gateway.admit(&req).await.allow);
        }
        assert!(!f.gateway.admit(&req).await.allow);

        f.clock.advance_ms(60_001);
        let d = f.gateway.admit(&req).await;
        assert!(d.allow);
        assert_eq!(d.remaining, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_runs_handler_and_records_usage() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("GET", "/api/items", "1.2.3.4");

        let resp = f
            .gateway
            .handle(&req, |_req| async {
                Ok(HandlerResponse::ok(r#"{"items":[]}"#))
            })
            .await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, r#"{"items":[]}"#);
        assert!(header(&resp.headers, "X-Request-ID").is_some());

        // Usage recording is spawned; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = f.usage.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status_code, 200);
        assert_eq!(events[0].endpoint, "/api/items");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_scans_and_raises_alert() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("POST", "/api/files", "1.2.3.4")
            .with_body(r#"{"path":"../../etc/passwd"}"#);

        let resp = f
            .gateway
            .handle(&req, |_req| async { Ok(HandlerResponse::ok("ok")) })
            .await;
        // The scan never blocks or changes the response.
        assert_eq!(resp.status_code, 200);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let alerts = f.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "path_traversal");
        assert_eq!(alerts[0].ip, "1.2.3.4");
    }

    #[tokio::test]
    async fn test_handler_error_maps_to_status() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("GET", "/api", "1.2.3.4");

        let resp = f
            .gateway
            .handle(&req, |_req| async {
                Err::<HandlerResponse, _>(GatewayError::CircuitOpen {
                    dependency: "weather-service".to_string(),
                })
            })
            .await;
        assert_eq!(resp.status_code, 503);
    }

    #[tokio::test]
    async fn test_handler_can_guard_calls_with_fallback() {
        let f = fixture(GatewayConfig::default());
        let req = GatewayRequest::new("GET", "/api/weather", "1.2.3.4");
        let breakers = f.gateway.breakers().clone();

        let resp = f
            .gateway
            .handle(&req, move |_req| async move {
                let body = breakers
                    .guard_with_fallback(
                        "weather-service",
                        || async {
                            Err::<String, _>(GatewayError::Dependency("upstream down".into()))
                        },
                        || async { Ok("cached forecast".to_string()) },
                    )
                    .await?;
                Ok(HandlerResponse::ok(&body))
            })
            .await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, "cached forecast");
    }

    #[tokio::test]
    async fn test_denied_request_body_carries_reason() {
        let mut config = GatewayConfig::default();
        config.pipeline.allowed_methods = vec!["GET".to_string()];
        let f = fixture(config);

        let resp = f
            .gateway
            .handle(
                &GatewayRequest::new("TRACE", "/api", "1.2.3.4"),
                |_req| async { Ok(HandlerResponse::ok("never runs")) },
            )
            .await;
        assert_eq!(resp.status_code, 405);
        assert!(resp.body.contains("Method not allowed"));
    }
}

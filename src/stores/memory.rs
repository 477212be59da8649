//! In-memory collaborator implementations.
//!
//! Suitable for tests and single-process deployments. Each mirrors the
//! contract of its trait: the rule store preserves creation order, the state
//! store honors the retention TTL, the sinks buffer what they receive.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{AlertSink, KeyStore, RuleChangeHook, RuleStore, StateStore, UsageSink};
use crate::clock::Clock;
use crate::error::Result;
use crate::gateway::request::{ApiKey, KeyStatus, SecurityAlert, UsageEvent};
use crate::ratelimit::algorithms::Algorithm;
use crate::ratelimit::rules::{RateLimitRule, RuleScope};
use crate::ratelimit::state::RateLimitState;

/// Rule catalog backed by an insertion-ordered vector.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<Vec<RateLimitRule>>,
    on_change: RwLock<Option<RuleChangeHook>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, rejecting invalid configuration before it can ever
    /// reach evaluation. Fires the change hook on success.
    pub fn create_rule(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        debug!(rule_id = %rule.id, scope = ?rule.scope, "Registering rate limit rule");
        self.rules.write().push(rule);
        self.notify();
        Ok(())
    }

    /// Replace a rule in place, keeping its creation order. Fires the change
    /// hook on success.
    pub fn update_rule(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                *existing = rule;
                drop(rules);
                self.notify();
                Ok(())
            }
            None => Err(crate::error::GatewayError::Configuration(format!(
                "rule '{}' does not exist",
                rule.id
            ))),
        }
    }

    fn notify(&self) {
        let hook = self.on_change.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    fn set_change_hook(&self, hook: RuleChangeHook) {
        *self.on_change.write() = Some(hook);
    }

    async fn list_rules_by_scope(&self, scope: RuleScope) -> Result<Vec<RateLimitRule>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| r.scope == scope)
            .cloned()
            .collect())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<RateLimitRule>> {
        Ok(self.rules.read().iter().find(|r| r.id == id).cloned())
    }
}

struct StoredState {
    state: RateLimitState,
    expires_at_ms: i64,
}

/// State store with TTL-based retention, checked lazily on read.
pub struct MemoryStateStore {
    entries: DashMap<(String, Algorithm), StoredState>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
}

impl MemoryStateStore {
    pub fn new(clock: Arc<dyn Clock>, retention_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            retention_ms: (retention_secs * 1000) as i64,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(
        &self,
        identifier: &str,
        algorithm: Algorithm,
    ) -> Result<Option<RateLimitState>> {
        let key = (identifier.to_string(), algorithm);
        let now = self.clock.now_ms();

        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at_ms > now {
                return Ok(Some(entry.state.clone()));
            }
        }
        self.entries.remove_if(&key, |_, v| v.expires_at_ms <= now);
        Ok(None)
    }

    async fn put(&self, state: RateLimitState) -> Result<()> {
        let expires_at_ms = self.clock.now_ms() + self.retention_ms;
        self.entries.insert(
            (state.identifier.clone(), state.algorithm),
            StoredState {
                state,
                expires_at_ms,
            },
        );
        Ok(())
    }
}

/// Key store mapping raw keys to their records.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, ApiKey>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, raw_key: &str, key: ApiKey) {
        self.keys.insert(raw_key.to_string(), key);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn validate_key(&self, raw_key: &str) -> Result<Option<ApiKey>> {
        // Format check before lookup.
        if raw_key.len() < 8 {
            return Ok(None);
        }
        match self.keys.get(raw_key) {
            Some(key) if key.status == KeyStatus::Active => Ok(Some(key.clone())),
            _ => Ok(None),
        }
    }
}

/// Usage sink buffering events for inspection.
#[derive(Default)]
pub struct BufferingUsageSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl BufferingUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl UsageSink for BufferingUsageSink {
    async fn record(&self, event: UsageEvent) -> Result<()> {
        debug!(event = %serde_json::to_string(&event).unwrap_or_default(), "Usage recorded");
        self.events.lock().push(event);
        Ok(())
    }
}

/// Alert sink buffering alerts for inspection.
#[derive(Default)]
pub struct BufferingAlertSink {
    alerts: Mutex<Vec<SecurityAlert>>,
}

impl BufferingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for BufferingAlertSink {
    async fn raise(&self, alert: SecurityAlert) -> Result<()> {
        debug!(category = %alert.category, ip = %alert.ip, "Security alert raised");
        self.alerts.lock().push(alert);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn rule(id: &str, scope: RuleScope, priority: i32) -> RateLimitRule {
        RateLimitRule {
            id: id.to_string(),
            algorithm: Algorithm::FixedWindow,
            quota: 10,
            window_ms: 60_000,
            scope,
            endpoint_patterns: Vec::new(),
            methods: Vec::new(),
            priority,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_rule_store_preserves_creation_order() {
        let store = MemoryRuleStore::new();
        store.create_rule(rule("a", RuleScope::Global, 0)).unwrap();
        store.create_rule(rule("b", RuleScope::Global, 0)).unwrap();
        store.create_rule(rule("c", RuleScope::Endpoint, 0)).unwrap();

        let global = store.list_rules_by_scope(RuleScope::Global).await.unwrap();
        assert_eq!(
            global.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn test_rule_store_rejects_invalid_rule() {
        let store = MemoryRuleStore::new();
        let mut bad = rule("bad", RuleScope::Global, 0);
        bad.quota = 0;
        assert!(store.create_rule(bad).is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rule_store_change_hook_fires_on_create_and_update() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = MemoryRuleStore::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        store.set_change_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.create_rule(rule("a", RuleScope::Global, 0)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        store.update_rule(rule("a", RuleScope::Global, 5)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        // Rejected writes never fire the hook.
        let mut bad = rule("bad", RuleScope::Global, 0);
        bad.quota = 0;
        assert!(store.create_rule(bad).is_err());
        assert!(store.update_rule(rule("ghost", RuleScope::Global, 0)).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rule_store_update_requires_existing_rule() {
        let store = MemoryRuleStore::new();
        assert!(store.update_rule(rule("ghost", RuleScope::Global, 0)).is_err());

        store.create_rule(rule("a", RuleScope::Global, 0)).unwrap();
        let mut updated = rule("a", RuleScope::Global, 5);
        updated.quota = 99;
        store.update_rule(updated).unwrap();
        assert_eq!(store.get_rule("a").await.unwrap().unwrap().quota, 99);
    }

    #[tokio::test]
    async fn test_key_store_validates_format_and_status() {
        let store = MemoryKeyStore::new();
        let key = ApiKey {
            id: "key-1".to_string(),
            scopes: Vec::new(),
            allowed_endpoints: Vec::new(),
            allowed_methods: Vec::new(),
            ip_whitelist: Vec::new(),
            status: KeyStatus::Active,
        };
        store.insert("gk_live_abcdef", key.clone());

        let mut suspended = key;
        suspended.id = "key-2".to_string();
        suspended.status = KeyStatus::Suspended;
        store.insert("gk_live_suspend", suspended);

        assert!(store
            .validate_key("gk_live_abcdef")
            .await
            .unwrap()
            .is_some());
        // Too short to be a well-formed key.
        assert!(store.validate_key("short").await.unwrap().is_none());
        // Unknown key.
        assert!(store.validate_key("gk_live_missing").await.unwrap().is_none());
        // Suspended key fails the status check.
        assert!(store.validate_key("gk_live_suspend").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_store_ttl_refresh_on_put() {
        let clock = ManualClock::new(0);
        let store = MemoryStateStore::new(clock.clone(), 10);

        let state = RateLimitState::new("id", Algorithm::TokenBucket, 5, 0);
        store.put(state.clone()).await.unwrap();

        clock.advance_ms(8_000);
        store.put(state).await.unwrap();

        // Initial TTL would have expired here, but the second put refreshed it.
        clock.advance_ms(8_000);
        assert!(store.get("id", Algorithm::TokenBucket).await.unwrap().is_some());

        clock.advance_ms(3_000);
        assert!(store.get("id", Algorithm::TokenBucket).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sinks_buffer_events() {
        let usage = BufferingUsageSink::new();
        usage
            .record(UsageEvent {
                request_id: "r1".to_string(),
                identifier: "id".to_string(),
                endpoint: "/api".to_string(),
                method: "GET".to_string(),
                status_code: 200,
                latency_ms: 3,
                request_bytes: 0,
                response_bytes: 2,
                timestamp_ms: 0,
            })
            .await
            .unwrap();
        assert_eq!(usage.events().len(), 1);
    }
}

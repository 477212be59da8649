//! Rule resolution: which rate-limit rules govern a given request.
//!
//! The resolver gathers candidate rules from the global, api_key, and
//! endpoint scopes, filters them by applicability, and orders them by
//! priority. Resolved sets are cached per (endpoint, method, key) for a
//! bounded TTL and invalidated eagerly whenever a rule changes.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::rules::{RateLimitRule, RuleScope};
use crate::clock::Clock;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::stores::RuleStore;

const ANONYMOUS: &str = "anonymous";

struct CachedRules {
    rules: Vec<RateLimitRule>,
    expires_at_ms: i64,
}

/// Resolves and caches the ordered rule list for a request.
pub struct RuleResolver {
    store: Arc<dyn RuleStore>,
    cache: DashMap<String, CachedRules>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl RuleResolver {
    pub fn new(
        store: Arc<dyn RuleStore>,
        clock: Arc<dyn Clock>,
        config: &RateLimitingConfig,
    ) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            clock,
            ttl_ms: (config.rule_cache_ttl_secs * 1000) as i64,
        }
    }

    /// Resolve the applicable rules for (endpoint, method, key), highest
    /// priority first. Callers evaluate in this order and stop at the first
    /// denial.
    pub async fn resolve(
        &self,
        endpoint: &str,
        method: &str,
        api_key_id: Option<&str>,
    ) -> Result<Vec<RateLimitRule>> {
        let cache_key = format!(
            "{}|{}|{}",
            endpoint,
            method.to_ascii_uppercase(),
            api_key_id.unwrap_or(ANONYMOUS)
        );
        let now = self.clock.now_ms();

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.expires_at_ms > now {
                trace!(key = %cache_key, "Rule cache hit");
                return Ok(entry.rules.clone());
            }
        }
        self.cache.remove_if(&cache_key, |_, v| v.expires_at_ms <= now);

        let mut candidates = self.store.list_rules_by_scope(RuleScope::Global).await?;
        if api_key_id.is_some() {
            candidates.extend(self.store.list_rules_by_scope(RuleScope::ApiKey).await?);
        }
        candidates.extend(self.store.list_rules_by_scope(RuleScope::Endpoint).await?);

        let mut rules: Vec<RateLimitRule> = candidates
            .into_iter()
            .filter(|r| r.applies_to(endpoint, method))
            .collect();
        // Stable sort: ties keep rule-creation order.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            key = %cache_key,
            rule_count = rules.len(),
            "Resolved rate limit rules"
        );

        self.cache.insert(
            cache_key,
            CachedRules {
                rules: rules.clone(),
                expires_at_ms: now + self.ttl_ms,
            },
        );

        Ok(rules)
    }

    /// Drop every cached rule set. Called whenever a rule is created or
    /// updated.
    pub fn invalidate(&self) {
        debug!("Invalidating resolved rule cache");
        self.cache.clear();
    }

    /// Number of cached rule sets, expired or not.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::algorithms::Algorithm;
    use crate::ratelimit::rules::EndpointPattern;
    use crate::stores::memory::MemoryRuleStore;

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

    fn resolver(store: Arc<MemoryRuleStore>, clock: Arc<ManualClock>) -> RuleResolver {
        RuleResolver::new(store, clock, &RateLimitingConfig::default())
    }

    #[tokio::test]
    async fn test_priority_descending_with_stable_ties() {
        let store = Arc::new(MemoryRuleStore::new());
        store.create_rule(rule("low", RuleScope::Global, 100)).unwrap();
        store.create_rule(rule("high", RuleScope::Global, 200)).unwrap();
        store.create_rule(rule("tie-first", RuleScope::Global, 150)).unwrap();
        store.create_rule(rule("tie-second", RuleScope::Global, 150)).unwrap();

        let resolver = resolver(store, ManualClock::new(0));
        let rules = resolver.resolve("/api/items", "GET", None).await.unwrap();

        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "tie-first", "tie-second", "low"]);
    }

    #[tokio::test]
    async fn test_api_key_scope_requires_a_key() {
        let store = Arc::new(MemoryRuleStore::new());
        store.create_rule(rule("global", RuleScope::Global, 0)).unwrap();
        store.create_rule(rule("keyed", RuleScope::ApiKey, 0)).unwrap();

        let resolver = resolver(store, ManualClock::new(0));

        let anonymous = resolver.resolve("/api/items", "GET", None).await.unwrap();
        assert_eq!(anonymous.len(), 1);
        assert_eq!(anonymous[0].id, "global");

        let keyed = resolver
            .resolve("/api/items", "GET", Some("key-1"))
            .await
            .unwrap();
        assert_eq!(keyed.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_and_non_matching_rules_filtered() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut disabled = rule("disabled", RuleScope::Global, 0);
        disabled.enabled = false;
        store.create_rule(disabled).unwrap();

        let mut scoped = rule("weather-only", RuleScope::Endpoint, 0);
        scoped.endpoint_patterns = vec![EndpointPattern::new("/api/weather").unwrap()];
        store.create_rule(scoped).unwrap();

        let mut post_only = rule("post-only", RuleScope::Endpoint, 0);
        post_only.methods = vec!["POST".to_string()];
        store.create_rule(post_only).unwrap();

        let resolver = resolver(store, ManualClock::new(0));
        let rules = resolver.resolve("/api/users", "GET", None).await.unwrap();
        assert!(rules.is_empty());

        let rules = resolver
            .resolve("/api/weather/current", "get", None)
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "weather-only");
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() {
        let store = Arc::new(MemoryRuleStore::new());
        store.create_rule(rule("first", RuleScope::Global, 0)).unwrap();

        let resolver = resolver(store.clone(), ManualClock::new(0));
        assert_eq!(resolver.resolve("/x", "GET", None).await.unwrap().len(), 1);

        // A rule added without invalidation is not yet visible.
        store.create_rule(rule("second", RuleScope::Global, 0)).unwrap();
        assert_eq!(resolver.resolve("/x", "GET", None).await.unwrap().len(), 1);

        resolver.invalidate();
        assert_eq!(resolver.resolve("/x", "GET", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_expires_by_ttl() {
        let store = Arc::new(MemoryRuleStore::new());
        store.create_rule(rule("first", RuleScope::Global, 0)).unwrap();

        let clock = ManualClock::new(0);
        let resolver = resolver(store.clone(), clock.clone());
        assert_eq!(resolver.resolve("/x", "GET", None).await.unwrap().len(), 1);

        store.create_rule(rule("second", RuleScope::Global, 0)).unwrap();

        // Default TTL is 5 minutes.
        clock.advance_ms(301_000);
        assert_eq!(resolver.resolve("/x", "GET", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_key_distinguishes_callers() {
        let store = Arc::new(MemoryRuleStore::new());
        store.create_rule(rule("global", RuleScope::Global, 0)).unwrap();

        let resolver = resolver(store, ManualClock::new(0));
        resolver.resolve("/x", "GET", None).await.unwrap();
        resolver.resolve("/x", "GET", Some("key-1")).await.unwrap();
        resolver.resolve("/x", "POST", None).await.unwrap();

        assert_eq!(resolver.cached_len(), 3);
    }
}

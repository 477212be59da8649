//! Collaborator interfaces consumed by the admission core.
//!
//! These traits abstract the durable rule catalog, the state store, the key
//! store, and the two fire-and-forget sinks so the core never depends on a
//! concrete persistence engine. `memory` holds in-process implementations
//! used by the test suite and single-process deployments.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::gateway::request::{ApiKey, SecurityAlert, UsageEvent};
use crate::ratelimit::algorithms::Algorithm;
use crate::ratelimit::rules::{RateLimitRule, RuleScope};
use crate::ratelimit::state::RateLimitState;

/// Invoked after any rule create or update.
pub type RuleChangeHook = Arc<dyn Fn() + Send + Sync>;

/// Durable catalog of rate-limit rules, owned by an administrative service.
/// The core only reads and caches.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules registered for a scope, in creation order.
    async fn list_rules_by_scope(&self, scope: RuleScope) -> Result<Vec<RateLimitRule>>;

    async fn get_rule(&self, id: &str) -> Result<Option<RateLimitRule>>;

    /// Register a hook invoked after every successful rule create or update.
    /// The pipeline wires this to the resolver's cache invalidation so rule
    /// changes take effect immediately. Stores whose rules never change may
    /// keep the default no-op.
    fn set_change_hook(&self, _hook: RuleChangeHook) {}
}

/// Durable per-identifier-per-algorithm state, with TTL expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, identifier: &str, algorithm: Algorithm)
        -> Result<Option<RateLimitState>>;

    /// Upsert, refreshing the record's TTL.
    async fn put(&self, state: RateLimitState) -> Result<()>;
}

/// API key validation: format check, lookup, status check. Returns `None`
/// for keys that fail any of them.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn validate_key(&self, raw_key: &str) -> Result<Option<ApiKey>>;
}

/// Usage/analytics sink. Errors are logged by the pipeline and never
/// propagated to the caller.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, event: UsageEvent) -> Result<()>;
}

/// Security alert sink, same fire-and-forget contract as [`UsageSink`].
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: SecurityAlert) -> Result<()>;
}

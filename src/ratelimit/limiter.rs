//! Core rate limiter: applies the resolved rule list to a request.
//!
//! Rules are evaluated in resolver order; the first denial short-circuits,
//! so a request is never charged against rules after the one that denied it.
//! If the evaluation itself fails (rule store or state store unreachable),
//! the limiter fails open: availability wins over strict quota enforcement.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::resolver::RuleResolver;
use super::rules::RateLimitRule;
use super::state::{RateLimitState, StateCache};
use crate::clock::Clock;
use crate::error::Result;

/// Outcome of a rate-limit check across all applicable rules.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Remaining quota under the most restrictive rule. `None` when no
    /// finite quota applies (no rules matched, or the check failed open).
    pub remaining: Option<u64>,
    pub reset_at_ms: Option<i64>,
    /// Set only on denial.
    pub retry_after_secs: Option<u64>,
    /// The denying rule, or the most restrictive allowing rule.
    pub rule_id: Option<String>,
    /// True when the evaluation errored and the request was allowed through.
    pub failed_open: bool,
}

impl RateLimitDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
            reset_at_ms: None,
            retry_after_secs: None,
            rule_id: None,
            failed_open: false,
        }
    }

    fn fail_open() -> Self {
        Self {
            failed_open: true,
            ..Self::unlimited()
        }
    }
}

/// Applies the resolver's ordered rule list against the state cache.
pub struct RateLimiter {
    resolver: Arc<RuleResolver>,
    state: Arc<StateCache>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(resolver: Arc<RuleResolver>, state: Arc<StateCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            state,
            clock,
        }
    }

    /// Check every applicable rule for the request, charging `cost` against
    /// each until one denies. Never returns an error: evaluation failures
    /// fail open.
    pub async fn check(
        &self,
        endpoint: &str,
        method: &str,
        identifier: &str,
        api_key_id: Option<&str>,
        cost: u64,
    ) -> RateLimitDecision {
        match self
            .check_inner(endpoint, method, identifier, api_key_id, cost)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    identifier,
                    endpoint,
                    error = %e,
                    "Rate limit evaluation failed, allowing request"
                );
                RateLimitDecision::fail_open()
            }
        }
    }

    async fn check_inner(
        &self,
        endpoint: &str,
        method: &str,
        identifier: &str,
        api_key_id: Option<&str>,
        cost: u64,
    ) -> Result<RateLimitDecision> {
        let rules = self.resolver.resolve(endpoint, method, api_key_id).await?;
        if rules.is_empty() {
            trace!(identifier, endpoint, "No rate limit rules apply");
            return Ok(RateLimitDecision::unlimited());
        }

        let mut decision = RateLimitDecision::unlimited();
        for rule in &rules {
            let verdict = self.apply_rule(rule, identifier, cost).await?;
            if !verdict.allowed {
                debug!(
                    identifier,
                    rule_id = %rule.id,
                    algorithm = %rule.algorithm,
                    "Rate limit exceeded"
                );
                // Short-circuit: later rules are never charged.
                return Ok(RateLimitDecision {
                    allowed: false,
                    remaining: Some(0),
                    reset_at_ms: Some(verdict.reset_at_ms),
                    retry_after_secs: Some(verdict.retry_after_secs),
                    rule_id: Some(rule.id.clone()),
                    failed_open: false,
                });
            }

            if decision.remaining.map_or(true, |r| verdict.remaining < r) {
                decision.remaining = Some(verdict.remaining);
                decision.reset_at_ms = Some(verdict.reset_at_ms);
                decision.rule_id = Some(rule.id.clone());
            }
        }

        Ok(decision)
    }

    /// Evaluate a single rule against the caller's state, persisting the
    /// updated snapshot through both cache tiers before returning.
    pub async fn apply_rule(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        cost: u64,
    ) -> Result<super::algorithms::AlgorithmVerdict> {
        let now = self.clock.now_ms();
        let state = match self.state.get(identifier, rule.algorithm).await? {
            Some(state) => state,
            None => RateLimitState::new(identifier, rule.algorithm, rule.quota, now),
        };

        let (next, verdict) = rule
            .algorithm
            .evaluate(&state, rule.quota, rule.window_ms, cost, now);
        self.state.put(next).await?;

        Ok(verdict)
    }

    /// Evaluate a standalone rule with fail-open semantics. Used by the
    /// pipeline's DDoS heuristic, which runs outside the resolver.
    pub async fn check_rule(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        cost: u64,
    ) -> RateLimitDecision {
        match self.apply_rule(rule, identifier, cost).await {
            Ok(verdict) => RateLimitDecision {
                allowed: verdict.allowed,
                remaining: Some(verdict.remaining),
                reset_at_ms: Some(verdict.reset_at_ms),
                retry_after_secs: if verdict.allowed {
                    None
                } else {
                    Some(verdict.retry_after_secs)
                },
                rule_id: Some(rule.id.clone()),
                failed_open: false,
            },
            Err(e) => {
                warn!(
                    identifier,
                    rule_id = %rule.id,
                    error = %e,
                    "Standalone rule evaluation failed, allowing request"
                );
                RateLimitDecision::fail_open()
            }
        }
    }
}

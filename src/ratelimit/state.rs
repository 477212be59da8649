//! Rate limit state records and the two-tier state cache.
//!
//! One state record exists per (identifier, algorithm) pair. Records are
//! created lazily on first request, updated on every admission check, and
//! expire by TTL in both tiers: a short-lived process-local map in front of
//! a durable store with a long retention window.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::algorithms::Algorithm;
use crate::clock::Clock;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::stores::StateStore;

/// Mutable per-identifier-per-algorithm admission state.
///
/// The active counter and clock anchor depend on the algorithm; unused
/// fields stay at their initial values. After any update the counter is
/// non-negative and at most the rule's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    /// The key this state is tracked against (API key id, IP, or user id)
    pub identifier: String,
    /// Algorithm the record belongs to
    pub algorithm: Algorithm,
    /// Token bucket: tokens currently available
    pub tokens: u64,
    /// Fixed window: requests admitted in the current window
    pub requests: u64,
    /// Leaky bucket: queued request slots
    pub queue_size: u64,
    /// Sliding window: admitted request timestamps, pruned on evaluation
    #[serde(default)]
    pub timestamps: Vec<i64>,
    /// Token bucket: last refill instant (epoch ms)
    pub last_refill_ms: i64,
    /// Fixed window: start of the current window (epoch ms)
    pub window_start_ms: i64,
    /// Leaky bucket: last leak instant (epoch ms)
    pub last_leak_ms: i64,
    /// Monotonic evaluation counter, observability only
    pub total_requests: u64,
}

impl RateLimitState {
    /// Fresh state for the first request of an identifier. The token bucket
    /// starts full.
    pub fn new(identifier: &str, algorithm: Algorithm, capacity: u64, now_ms: i64) -> Self {
        Self {
            identifier: identifier.to_string(),
            algorithm,
            tokens: capacity,
            requests: 0,
            queue_size: 0,
            timestamps: Vec::new(),
            last_refill_ms: now_ms,
            window_start_ms: now_ms,
            last_leak_ms: now_ms,
            total_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedState {
    state: RateLimitState,
    expires_at_ms: i64,
}

/// Two-tier cache over rate limit state.
///
/// Reads check the process-local tier first (lazy expiry on access), then
/// the durable store. Writes go through to both tiers; the durable write
/// must complete before the verdict is returned, which bounds (but does not
/// eliminate) the window where concurrent requests read stale state. That
/// best-effort model is deliberate: the effective rate may exceed the quota
/// by a small factor proportional to concurrency, in exchange for not
/// locking per identifier.
pub struct StateCache {
    local: DashMap<(String, Algorithm), CachedState>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    local_ttl_ms: i64,
}

impl StateCache {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        config: &RateLimitingConfig,
    ) -> Self {
        Self {
            local: DashMap::new(),
            store,
            clock,
            local_ttl_ms: (config.state_cache_ttl_secs * 1000) as i64,
        }
    }

    /// Read state for an identifier, populating the local tier on a durable
    /// hit. Returns `None` when no record exists yet.
    pub async fn get(
        &self,
        identifier: &str,
        algorithm: Algorithm,
    ) -> Result<Option<RateLimitState>> {
        let key = (identifier.to_string(), algorithm);
        let now = self.clock.now_ms();

        if let Some(entry) = self.local.get(&key) {
            if entry.expires_at_ms > now {
                trace!(identifier, algorithm = %algorithm, "State cache hit (local)");
                return Ok(Some(entry.state.clone()));
            }
        }
        self.local.remove_if(&key, |_, v| v.expires_at_ms <= now);

        match self.store.get(identifier, algorithm).await? {
            Some(state) => {
                trace!(identifier, algorithm = %algorithm, "State cache hit (durable)");
                self.local.insert(
                    key,
                    CachedState {
                        state: state.clone(),
                        expires_at_ms: now + self.local_ttl_ms,
                    },
                );
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Write state through both tiers. The durable write must complete
    /// before the caller's verdict is returned, and before the local tier is
    /// touched: a failed durable write must not leave the local tier holding
    /// a snapshot the durable tier never saw.
    pub async fn put(&self, state: RateLimitState) -> Result<()> {
        self.store.put(state.clone()).await?;

        let now = self.clock.now_ms();
        self.local.insert(
            (state.identifier.clone(), state.algorithm),
            CachedState {
                state,
                expires_at_ms: now + self.local_ttl_ms,
            },
        );
        Ok(())
    }

    /// Drop all local-tier entries. The durable tier is untouched.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    /// Number of local-tier entries, expired or not.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

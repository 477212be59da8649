//! Per-dependency circuit breakers.
//!
//! A breaker wraps every call to an unreliable collaborator (state store,
//! downstream API). Failures are counted in a sliding window; once the
//! threshold is reached the circuit opens and calls fail fast until a timed
//! recovery probe succeeds. One breaker instance exists per named dependency,
//! looked up from a process-wide registry so all call sites share state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::error::{GatewayError, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; failures counted in the monitoring window
    Closed,
    /// Calls fail fast until the recovery timeout passes
    Open,
    /// Probing: trial calls allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    /// Sliding failure window, pruned on each evaluation
    failure_timestamps: Vec<i64>,
    /// Counted only while half-open
    consecutive_successes: u32,
    /// Set iff state == Open
    next_attempt_at_ms: Option<i64>,
}

/// Point-in-time view of one breaker, for logging and admin surfaces.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub consecutive_successes: u32,
    pub next_attempt_at_ms: Option<i64>,
}

/// State machine guarding calls to a single named dependency.
///
/// State transitions are driven exclusively by call outcomes and the wall
/// clock. Mutation is synchronized behind one mutex per instance, so no two
/// callers can both act on the same transition.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_timestamps: Vec::new(),
                consecutive_successes: 0,
                next_attempt_at_ms: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failure_timestamps.len(),
            consecutive_successes: inner.consecutive_successes,
            next_attempt_at_ms: inner.next_attempt_at_ms,
        }
    }

    /// Execute `op` under the breaker, bounded by the per-call timeout.
    /// A timeout counts as a failure. Fails fast with [`GatewayError::CircuitOpen`]
    /// while the circuit is open.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(e)
            }
            Err(_) => {
                self.record_failure();
                Err(GatewayError::Timeout {
                    dependency: self.name.clone(),
                    timeout_ms: self.config.call_timeout_ms,
                })
            }
        }
    }

    /// Like [`call`](Self::call), but invokes `fallback` whenever the
    /// primary call fails or the circuit is open. If the fallback itself
    /// fails, the original error is surfaced, not the fallback's.
    pub async fn call_with_fallback<T, F, Fut, FB, FutB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T>>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(original) => {
                debug!(
                    dependency = %self.name,
                    error = %original,
                    "Primary call failed, invoking fallback"
                );
                match fallback().await {
                    Ok(value) => Ok(value),
                    Err(fallback_err) => {
                        warn!(
                            dependency = %self.name,
                            error = %fallback_err,
                            "Fallback failed, surfacing original error"
                        );
                        Err(original)
                    }
                }
            }
        }
    }

    /// Admission check: transitions Open to HalfOpen lazily once the
    /// recovery timeout has passed.
    fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = self.clock.now_ms();
                match inner.next_attempt_at_ms {
                    Some(next_attempt) if now >= next_attempt => {
                        info!(
                            dependency = %self.name,
                            "Circuit breaker transitioning to half-open"
                        );
                        inner.state = CircuitState::HalfOpen;
                        inner.consecutive_successes = 0;
                        inner.next_attempt_at_ms = None;
                        Ok(())
                    }
                    _ => Err(GatewayError::CircuitOpen {
                        dependency: self.name.clone(),
                    }),
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!(
                        dependency = %self.name,
                        successes = inner.consecutive_successes,
                        "Circuit breaker closing after successful probes"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_timestamps.clear();
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now_ms();
        match inner.state {
            CircuitState::Closed => {
                let cutoff = now - self.config.monitoring_window_ms as i64;
                inner.failure_timestamps.retain(|&ts| ts > cutoff);
                inner.failure_timestamps.push(now);

                if inner.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        dependency = %self.name,
                        failures = inner.failure_timestamps.len(),
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at_ms =
                        Some(now + self.config.recovery_timeout_ms as i64);
                }
            }
            CircuitState::HalfOpen => {
                // Any single failure while probing reopens the circuit.
                warn!(
                    dependency = %self.name,
                    "Circuit breaker reopening after probe failure"
                );
                inner.state = CircuitState::Open;
                inner.consecutive_successes = 0;
                inner.failure_timestamps.push(now);
                inner.next_attempt_at_ms = Some(now + self.config.recovery_timeout_ms as i64);
            }
            CircuitState::Open => {}
        }
    }
}

/// Process-wide registry of breakers keyed by dependency name.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            clock,
        }
    }

    /// Look up the breaker for a dependency, creating it with the default
    /// configuration on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.defaults.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Register a breaker with a dependency-specific configuration,
    /// replacing any default-configured instance.
    pub fn register(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config, self.clock.clone()));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Guard a call to a named dependency.
    pub async fn guard<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get(name).call(op).await
    }

    /// Guard a call with a fallback (see [`CircuitBreaker::call_with_fallback`]).
    pub async fn guard_with_fallback<T, F, Fut, FB, FutB>(
        &self,
        name: &str,
        op: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T>>,
    {
        self.get(name).call_with_fallback(op, fallback).await
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }
}

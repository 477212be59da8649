//! The four admission algorithms.
//!
//! Each algorithm is a pure function over an explicit state snapshot: it
//! takes the current state, the rule's parameters, and a requested cost, and
//! returns a new snapshot plus a verdict. Nothing here mutates shared state;
//! the caller persists the returned snapshot.
//!
//! One deliberate asymmetry: the token and leaky buckets credit elapsed
//! refill/leak even on a denied call (the clock anchor moves to `now` on both
//! paths), while the fixed and sliding windows leave their counters untouched
//! on deny. A denied request must not lose earned tokens, and a denied
//! request must not consume window quota.

use serde::{Deserialize, Serialize};

use super::state::RateLimitState;

/// Admission algorithm variants. Adding an algorithm means adding one
/// variant and one evaluation function below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    FixedWindow,
    SlidingWindow,
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outcome of one algorithm evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmVerdict {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Quota remaining after this evaluation
    pub remaining: u64,
    /// Epoch milliseconds at which the quota resets or refills
    pub reset_at_ms: i64,
    /// Seconds until a retry could succeed. Zero when allowed.
    pub retry_after_secs: u64,
}

impl Algorithm {
    /// Evaluate one request of cost `requested` against `state`.
    ///
    /// `quota` and `window_ms` are validated at rule-creation time and
    /// assumed positive here. `requested` defaults to 1 and is clamped to be
    /// positive.
    pub fn evaluate(
        &self,
        state: &RateLimitState,
        quota: u64,
        window_ms: u64,
        requested: u64,
        now_ms: i64,
    ) -> (RateLimitState, AlgorithmVerdict) {
        let requested = requested.max(1);
        let mut next = state.clone();
        next.total_requests += 1;

        let verdict = match self {
            Algorithm::TokenBucket => {
                token_bucket(&mut next, quota, window_ms, requested, now_ms)
            }
            Algorithm::FixedWindow => {
                fixed_window(&mut next, quota, window_ms, requested, now_ms)
            }
            Algorithm::SlidingWindow => {
                sliding_window(&mut next, quota, window_ms, requested, now_ms)
            }
            Algorithm::LeakyBucket => {
                leaky_bucket(&mut next, quota, window_ms, requested, now_ms)
            }
        };

        (next, verdict)
    }
}

/// Tokens (or queue slots) earned per second for a quota over a window.
fn rate_per_sec(quota: u64, window_ms: u64) -> f64 {
    quota as f64 / (window_ms as f64 / 1000.0)
}

fn token_bucket(
    state: &mut RateLimitState,
    capacity: u64,
    window_ms: u64,
    requested: u64,
    now_ms: i64,
) -> AlgorithmVerdict {
    let rate = rate_per_sec(capacity, window_ms);
    let elapsed_ms = (now_ms - state.last_refill_ms).max(0);
    let tokens_to_add = ((elapsed_ms as f64 / 1000.0) * rate).floor() as u64;
    let new_tokens = capacity.min(state.tokens.saturating_add(tokens_to_add));

    let allowed = new_tokens >= requested;
    // Partial refill is credited even on denial.
    state.tokens = if allowed {
        new_tokens - requested
    } else {
        new_tokens
    };
    state.last_refill_ms = now_ms;

    let missing = capacity - state.tokens;
    let reset_at_ms = now_ms + ((missing as f64 / rate) * 1000.0).ceil() as i64;
    let retry_after_secs = if allowed {
        0
    } else {
        (((requested - new_tokens) as f64 / rate).ceil() as u64).max(1)
    };

    AlgorithmVerdict {
        allowed,
        remaining: state.tokens,
        reset_at_ms,
        retry_after_secs,
    }
}

fn fixed_window(
    state: &mut RateLimitState,
    limit: u64,
    window_ms: u64,
    requested: u64,
    now_ms: i64,
) -> AlgorithmVerdict {
    let elapsed_ms = now_ms - state.window_start_ms;

    let allowed = if elapsed_ms >= window_ms as i64 {
        // New window. The denied case leaves the counter unchanged.
        let allowed = requested <= limit;
        if allowed {
            state.requests = requested;
        }
        state.window_start_ms = now_ms;
        allowed
    } else {
        let allowed = state.requests.saturating_add(requested) <= limit;
        if allowed {
            state.requests += requested;
        }
        allowed
    };

    let reset_at_ms = state.window_start_ms + window_ms as i64;
    let retry_after_secs = if allowed {
        0
    } else {
        ((((reset_at_ms - now_ms).max(0)) as f64 / 1000.0).ceil() as u64).max(1)
    };

    AlgorithmVerdict {
        allowed,
        remaining: limit.saturating_sub(state.requests),
        reset_at_ms,
        retry_after_secs,
    }
}

fn sliding_window(
    state: &mut RateLimitState,
    limit: u64,
    window_ms: u64,
    requested: u64,
    now_ms: i64,
) -> AlgorithmVerdict {
    let cutoff = now_ms - window_ms as i64;
    state.timestamps.retain(|&ts| ts > cutoff);

    let allowed = state.timestamps.len() as u64 + requested <= limit;
    if allowed {
        for _ in 0..requested {
            state.timestamps.push(now_ms);
        }
    }

    let reset_at_ms = state
        .timestamps
        .first()
        .map(|&oldest| oldest + window_ms as i64)
        .unwrap_or(now_ms + window_ms as i64);
    let retry_after_secs = if allowed {
        0
    } else {
        ((((reset_at_ms - now_ms).max(0)) as f64 / 1000.0).ceil() as u64).max(1)
    };

    AlgorithmVerdict {
        allowed,
        remaining: limit.saturating_sub(state.timestamps.len() as u64),
        reset_at_ms,
        retry_after_secs,
    }
}

fn leaky_bucket(
    state: &mut RateLimitState,
    capacity: u64,
    window_ms: u64,
    requested: u64,
    now_ms: i64,
) -> AlgorithmVerdict {
    let rate = rate_per_sec(capacity, window_ms);
    let elapsed_ms = (now_ms - state.last_leak_ms).max(0);
    let leaked = ((elapsed_ms as f64 / 1000.0) * rate).floor() as u64;
    let new_size = state.queue_size.saturating_sub(leaked);

    let allowed = new_size.saturating_add(requested) <= capacity;
    // The leaked amount is credited even on denial.
    state.queue_size = if allowed { new_size + requested } else { new_size };
    state.last_leak_ms = now_ms;

    let reset_at_ms = now_ms + ((state.queue_size as f64 / rate) * 1000.0).ceil() as i64;
    let retry_after_secs = if allowed {
        0
    } else {
        let overflow = new_size + requested - capacity;
        ((overflow as f64 / rate).ceil() as u64).max(1)
    };

    AlgorithmVerdict {
        allowed,
        remaining: capacity.saturating_sub(state.queue_size),
        reset_at_ms,
        retry_after_secs,
    }
}

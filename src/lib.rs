//! Gatekeeper - API Gateway Admission-Control Core
//!
//! This crate implements the admission-control core of an API gateway: for
//! every inbound request it decides whether the request may proceed, at what
//! cost, and under what degraded-mode fallback when a guarded dependency is
//! unhealthy. It combines four rate-limiting algorithms, priority-ordered
//! rule resolution, a two-tier state cache, and a per-dependency circuit
//! breaker behind a single pipeline entry point.

pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod stores;

pub mod algorithms;
pub mod limiter;
pub mod resolver;
pub mod rules;
pub mod state;

pub use algorithms::{Algorithm, AlgorithmVerdict};
pub use limiter::{RateLimitDecision, RateLimiter};
pub use resolver::RuleResolver;
pub use rules::{EndpointPattern, RateLimitRule, RuleScope};
pub use state::{RateLimitState, StateCache};

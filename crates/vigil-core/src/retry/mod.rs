//! Retry pacing and failure gating.

mod backoff;
mod circuit;

pub use backoff::{Backoff, BackoffConfig};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

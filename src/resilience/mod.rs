//! Failure-protection primitives shared by the cache and write paths.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker, TripsBreaker};
pub use retry::{Backoff, BackoffKind, Exhausted, RetryPolicy};

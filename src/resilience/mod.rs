//! Fault handling around the downstream dependency: the circuit breaker and
//! the retry state machine.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerStats, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use retry::{RetryDecision, RetryPolicy, RetryState};

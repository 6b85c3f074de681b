//! Resilience decorators for fault-tolerant calls to unreliable dependencies.
//!
//! Two independent, composable wrappers around any fallible asynchronous
//! operation:
//!
//! - [`RetryPolicy`]: re-invokes an operation on transient failure with
//!   exponential backoff, up to a bounded attempt count.
//! - [`CircuitBreaker`]: tracks consecutive failures and temporarily
//!   short-circuits calls to a degraded dependency, probing for recovery
//!   after a cooldown.
//!
//! Neither wrapper swallows the underlying error: the retry policy returns
//! the last failure once attempts are exhausted and the breaker wraps the
//! operation's error in [`CircuitBreakerError::Operation`]. Which wraps which
//! when both are used is the caller's choice; they share no state.

use thiserror::Error;

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError,
    CircuitBreakerMetrics, CircuitState, Clock, MockClock, SystemClock,
};
pub use retry::{RetryPolicy, RetryPolicyBuilder, TransientError, DEFAULT_RETRYABLE_STATUS_CODES};

/// Validation error for resilience configuration builders.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

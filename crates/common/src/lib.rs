//! Shared foundations for the Breakwater HTTP client toolkit.
//!
//! This crate provides the pieces every other Breakwater crate builds on:
//!
//! - [`error`]: the typed application error (`AppError`) with its closed
//!   `ErrorKind` taxonomy, and the `AppResult<T>` outcome alias used instead
//!   of exceptions for expected failure paths.
//! - [`resilience`]: generic resilience decorators (a retry policy with
//!   exponential backoff and a circuit breaker with timed recovery probing)
//!   that wrap any fallible asynchronous operation.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod resilience;

pub use error::{AppError, AppResult, ErrorKind};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, RetryPolicy, SystemClock,
    TransientError,
};

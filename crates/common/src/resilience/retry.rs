//! Bounded retry with exponential backoff for transient failures.
//!
//! [`RetryPolicy`] wraps a no-argument asynchronous operation and re-invokes
//! it when the failure is classified as transient, sleeping between attempts
//! with exponential backoff. Non-transient failures propagate immediately
//! without consuming further attempts; once attempts are exhausted the last
//! failure is returned unchanged.
//!
//! Idempotency of the wrapped operation's side effects is the caller's
//! responsibility.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::{ConfigError, ConfigResult};

/// Status codes retried by default: request timeout, throttling, and the
/// common gateway/server failures.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Classification seam between the retry policy and the error type it sees.
///
/// A failure is transient when the transport never reached the host, or when
/// it carries an HTTP status the policy considers retryable.
pub trait TransientError {
    /// True when the failure happened at the connectivity level (DNS lookup,
    /// refused connection, dropped socket) rather than as an HTTP response.
    fn is_connectivity(&self) -> bool;

    /// The HTTP status carried by the failure, when one was observed.
    fn status(&self) -> Option<u16>;
}

/// Retry policy with exponential backoff.
///
/// Immutable once built; a single instance can be reused across calls and
/// shared freely.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    retryable_status_codes: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and default backoff.
    pub fn new(max_attempts: u32) -> ConfigResult<Self> {
        Self::builder().max_attempts(max_attempts).build()
    }

    /// Start building a policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Total number of attempts this policy will make (initial try included).
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether this failure is worth another attempt.
    pub fn is_retryable<E: TransientError>(&self, error: &E) -> bool {
        if error.is_connectivity() {
            return true;
        }
        error.status().is_some_and(|status| self.retryable_status_codes.contains(&status))
    }

    /// Backoff delay after failed attempt `attempt` (0-indexed):
    /// `min(base_delay * multiplier^attempt, max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Execute `operation`, retrying transient failures with backoff.
    ///
    /// Returns the operation's first successful result, or the last failure
    /// once attempts are exhausted. A non-transient failure is returned
    /// immediately with zero delay.
    #[instrument(skip(self, operation), fields(max_attempts = self.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + fmt::Debug,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        debug!(?error, "failure is not transient, giving up");
                        return Err(error);
                    }
                    if attempt + 1 >= self.max_attempts {
                        warn!(attempts = self.max_attempts, ?error, "retry attempts exhausted");
                        return Err(error);
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`] with validation.
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    /// Total attempt budget, initial try included. Must be at least 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Replace the set of HTTP statuses considered transient.
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.policy.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }
        if self.policy.multiplier <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "multiplier must be greater than 0".to_string(),
            });
        }
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    /// Minimal error carrying the two signals the policy classifies on.
    #[derive(Debug, Clone)]
    struct TestError {
        status: Option<u16>,
        connectivity: bool,
    }

    impl TestError {
        fn status(status: u16) -> Self {
            Self { status: Some(status), connectivity: false }
        }

        fn connectivity() -> Self {
            Self { status: None, connectivity: true }
        }
    }

    impl TransientError for TestError {
        fn is_connectivity(&self) -> bool {
            self.connectivity
        }

        fn status(&self) -> Option<u16> {
            self.status
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(1))
            .build()
            .expect("valid policy")
    }

    #[test]
    fn backoff_grows_exponentially_and_caps_at_max_delay() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build()
            .expect("valid policy");

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn default_retryable_set_matches_transient_statuses() {
        let policy = RetryPolicy::default();

        for status in DEFAULT_RETRYABLE_STATUS_CODES {
            assert!(policy.is_retryable(&TestError::status(status)), "{status} should retry");
        }
        assert!(!policy.is_retryable(&TestError::status(404)));
        assert!(!policy.is_retryable(&TestError::status(401)));
        assert!(policy.is_retryable(&TestError::connectivity()));
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        assert!(RetryPolicy::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicy::builder().multiplier(0.0).build().is_err());
        assert!(RetryPolicy::new(1).is_ok());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::from_millis(10))
            .build()
            .expect("valid policy");

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let started = Instant::now();

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::status(503))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("should recover"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two delays: 10ms then 20ms (monotonic backoff).
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn non_retryable_failure_propagates_immediately() {
        let policy = fast_policy(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::status(404))
                }
            })
            .await;

        let error = result.expect_err("should fail");
        assert_eq!(TransientError::status(&error), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one invocation, zero delays");
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_failure() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::status(502))
                }
            })
            .await;

        let error = result.expect_err("should exhaust");
        assert_eq!(TransientError::status(&error), Some(502));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connectivity_failures_are_retried() {
        let policy = fast_policy(2);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::connectivity())
                    } else {
                        Ok("up")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("should recover"), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

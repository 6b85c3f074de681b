//! Circuit breaker with timed recovery probing.
//!
//! The breaker protects a downstream dependency from repeated calls while it
//! is failing. It is CLOSED in normal operation; once consecutive failures
//! reach the configured threshold it OPENs and rejects calls immediately.
//! After the reset timeout elapses it lazily moves to HALF_OPEN, where a
//! single trial call is permitted: success closes the circuit and clears the
//! counters, failure re-opens it.
//!
//! State transitions are a function only of the failure count versus the
//! threshold and of elapsed time versus the reset timeout, never of request
//! content. One instance is meant to be long-lived and scoped to a call site;
//! cloning shares the underlying state.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::retry::TransientError;
use super::{ConfigError, ConfigResult};
use crate::error::AppError;

/// Trait for time operations to enable deterministic testing.
///
/// Production code uses [`SystemClock`]; tests drive [`MockClock`] to
/// exercise timeout behavior without real delays.
pub trait Clock: Send + Sync + 'static {
    /// Current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic tests.
///
/// Clones share the same elapsed time, so a test can keep a handle while the
/// breaker owns another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock without sleeping.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Convenience for `advance(Duration::from_millis(millis))`.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|elapsed| *elapsed).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Dependency considered down, calls rejected immediately.
    Open,
    /// Cooldown elapsed, one trial call permitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`].
///
/// The breaker never swallows the wrapped operation's error: it either
/// rejects the call up front or passes the failure through as
/// [`CircuitBreakerError::Operation`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit is open; the wrapped operation was not invoked.
    #[error("circuit breaker is open, rejecting calls")]
    Open,

    /// The wrapped operation itself failed.
    #[error("operation failed")]
    Operation {
        #[source]
        source: E,
    },
}

impl<E> CircuitBreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The underlying operation error, if the call got that far.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open => None,
            Self::Operation { source } => Some(source),
        }
    }
}

/// A rejected call never reached the host, but hammering an open breaker is
/// pointless, so only the wrapped failure's own classification can retry.
impl<E> TransientError for CircuitBreakerError<E>
where
    E: TransientError + std::error::Error + Send + Sync + 'static,
{
    fn is_connectivity(&self) -> bool {
        match self {
            Self::Open => false,
            Self::Operation { source } => source.is_connectivity(),
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            Self::Open => None,
            Self::Operation { source } => source.status(),
        }
    }
}

/// Translate decorator failures back into the application error at the
/// boundary where the breaker is composed with the HTTP client.
impl From<CircuitBreakerError<AppError>> for AppError {
    fn from(error: CircuitBreakerError<AppError>) -> Self {
        match error {
            CircuitBreakerError::Open => {
                AppError::unknown("circuit breaker is open, rejecting calls")
            }
            CircuitBreakerError::Operation { source } => source,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a trial call is permitted.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_millis(30_000) }
    }
}

impl CircuitBreakerConfig {
    /// Start building a configuration.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of breaker state for observability.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Holds the HALF_OPEN trial slot and releases it on drop, whether the trial
/// settled or its future was abandoned before completion.
struct TrialSlot {
    inner: Arc<Mutex<BreakerInner>>,
}

impl Drop for TrialSlot {
    fn drop(&mut self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.trial_in_flight = false;
    }
}

/// Circuit breaker around calls to a single downstream dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &metrics.state)
            .field("failure_count", &metrics.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with the default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Arc::new(Mutex::new(BreakerInner::new())),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner::new())),
            clock: Arc::new(clock),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Lazy OPEN -> HALF_OPEN transition once the reset timeout has elapsed.
    fn resolve_state(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(last_failure) = inner.last_failure {
            let elapsed = self.clock.now().duration_since(last_failure);
            if elapsed > self.config.reset_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
                debug!(elapsed_ms = elapsed.as_millis() as u64, "circuit breaker half-open");
            }
        }
    }

    /// Current state of the breaker.
    ///
    /// Side-effect-free except for the lazy OPEN -> HALF_OPEN transition;
    /// repeated calls without an intervening `execute` are idempotent.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.resolve_state(&mut inner);
        inner.state
    }

    /// Snapshot of the breaker's observable state.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.lock();
        self.resolve_state(&mut inner);
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }

    /// Execute `operation` under breaker protection.
    ///
    /// While OPEN the call fails immediately with [`CircuitBreakerError::Open`]
    /// and the operation is not invoked. In HALF_OPEN at most one trial call
    /// is admitted at a time; concurrent callers see the breaker as open.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let admitted_as = {
            let mut inner = self.lock();
            self.resolve_state(&mut inner);
            match inner.state {
                CircuitState::Open => {
                    debug!("circuit breaker rejecting call while OPEN");
                    return Err(CircuitBreakerError::Open);
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        debug!("trial call already in flight, rejecting");
                        return Err(CircuitBreakerError::Open);
                    }
                    inner.trial_in_flight = true;
                    CircuitState::HalfOpen
                }
                CircuitState::Closed => CircuitState::Closed,
            }
        };

        // The slot must be released even when the caller drops this future
        // mid-trial (a layered timeout does exactly that), otherwise the
        // breaker would stay HALF_OPEN with the slot taken forever.
        let _trial_slot = (admitted_as == CircuitState::HalfOpen)
            .then(|| TrialSlot { inner: Arc::clone(&self.inner) });

        match operation().await {
            Ok(value) => {
                if admitted_as == CircuitState::HalfOpen {
                    let mut inner = self.lock();
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.last_failure = None;
                    info!("circuit breaker closed after successful trial call");
                }
                Ok(value)
            }
            Err(error) => {
                let mut inner = self.lock();
                inner.failure_count += 1;
                inner.last_failure = Some(self.clock.now());
                if inner.failure_count >= self.config.failure_threshold
                    && inner.state != CircuitState::Open
                {
                    inner.state = CircuitState::Open;
                    warn!(failures = inner.failure_count, "circuit breaker opened");
                }
                Err(CircuitBreakerError::Operation { source: error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;

    fn breaker_with_clock(threshold: u32, clock: MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_millis(30_000))
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock(config, clock).expect("valid breaker")
    }

    async fn fail(breaker: &CircuitBreaker<MockClock>) {
        let result = breaker
            .execute(|| async { Err::<(), _>(AppError::unknown("boom").with_status(500)) })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Operation { .. })));
    }

    #[test]
    fn mock_clock_advances_without_sleeping() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));

        let shared = clock.clone();
        shared.advance_millis(500);
        assert_eq!(clock.elapsed(), Duration::from_millis(5_500));
    }

    #[test]
    fn config_defaults_and_validation() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_millis(30_000));

        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
    }

    #[test]
    fn state_display_matches_wire_labels() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker_with_clock(3, MockClock::new());

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking_operation() {
        let breaker = breaker_with_clock(3, MockClock::new());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = breaker
            .execute(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(1)
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_after_reset_timeout_then_closes_on_success() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(3, clock.clone());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timeout must strictly elapse before the breaker probes again.
        clock.advance_millis(30_000);
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance_millis(1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = breaker.execute(|| async { Ok::<_, AppError>("recovered") }).await;
        assert_eq!(result.expect("trial should succeed"), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);

        // Counters were cleared: it takes threshold more failures to re-open.
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_trial_failure_reopens() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(2, clock.clone());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_millis(30_001);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The failure timestamp was refreshed, so the cooldown restarts.
        clock.advance_millis(15_000);
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance_millis(15_001);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn abandoned_trial_releases_the_half_open_slot() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(2, clock.clone());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_millis(30_001);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A caller-side deadline drops the admitted trial before it settles.
        let stalled = breaker.execute(|| std::future::pending::<Result<(), AppError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The slot is free again: the next trial runs and closes the circuit.
        let result = breaker.execute(|| async { Ok::<_, AppError>("recovered") }).await;
        assert_eq!(result.expect("trial should run"), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn state_queries_are_idempotent() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, clock.clone());
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_millis(30_001);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn operation_error_passes_through_unchanged() {
        let breaker = CircuitBreaker::with_defaults();
        let result = breaker
            .execute(|| async { Err::<(), _>(AppError::conflict("Conflict").with_status(409)) })
            .await;

        let error = result.expect_err("should fail").into_inner().expect("operation error");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert_eq!(error.status(), Some(409));
    }

    #[tokio::test]
    async fn breaker_errors_translate_to_app_errors() {
        let breaker = breaker_with_clock(1, MockClock::new());
        fail(&breaker).await;

        let result = breaker.execute(|| async { Ok::<_, AppError>(()) }).await;
        let app: AppError = result.expect_err("rejected").into();
        assert_eq!(app.kind(), ErrorKind::Unknown);
        assert!(app.message().contains("circuit breaker is open"));
        assert!(!crate::resilience::RetryPolicy::default().is_retryable(&app));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let breaker = breaker_with_clock(2, MockClock::new());
        let shared = breaker.clone();

        fail(&breaker).await;
        fail(&shared).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(shared.state(), CircuitState::Open);
    }
}

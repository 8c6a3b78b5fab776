//! Per-provider circuit breaker.
//!
//! Isolates an unreliable provider so repeated failures stop consuming
//! rate-limit tokens, sockets and worker time.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[failure_threshold consecutive failures]--> OPEN
//!   ^                                                   |
//!   |                                      [reset_timeout elapsed,
//!   |                                       checked by can_execute]
//!   |                                                   v
//!   +-----[half_open_max_calls successes]-------- HALF_OPEN
//!                                                       |
//!                          OPEN <-------[any failure]---+
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens.
    pub failure_threshold: u32,

    /// Time since the last failure before an open circuit admits a probe.
    pub reset_timeout: Duration,

    /// Probe calls admitted while half-open; that many successes close the circuit.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failures: u32,
    half_open_calls: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            half_open_calls: 0,
            last_failure_time: None,
            last_error_message: None,
        }
    }

    fn remaining_cooldown(&self, reset_timeout: Duration) -> Duration {
        self.last_failure_time
            .map(|t| reset_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(reset_timeout)
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_calls: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - request was rejected without calling the provider.
    Open { name: String, retry_after: Duration },
    /// The protected operation failed.
    Inner(AppError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open { name, retry_after } => {
                AppError::CircuitOpen { name, retry_after }
            }
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

/// Thread-safe circuit breaker guarding one provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Current state. Never transitions; use [`can_execute`](Self::can_execute) for that.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock_inner();
        let time_until_half_open = (inner.state == CircuitState::Open)
            .then(|| inner.remaining_cooldown(self.config.reset_timeout));

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            half_open_calls: inner.half_open_calls,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Decides whether a call may proceed.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open
    /// here, with a fresh probe budget.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock_inner();
        self.admit(&mut inner)
    }

    fn admit(&self, inner: &mut CircuitBreakerInner) -> bool {
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker transitioning to half-open state"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                    true
                } else {
                    false
                }
            }
            // `half_open_calls` counts completed successes, not calls in
            // flight, so concurrent probes are all admitted until the
            // budget of successes closes the circuit.
            CircuitState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// Rejected calls return [`CircuitBreakerError::Open`] without running
    /// `operation`. Errors for which [`AppError::should_trip_circuit`] is
    /// false (cancellation, deadline) are passed through unrecorded.
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        {
            let mut inner = self.lock_inner();
            if !self.admit(&mut inner) {
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: inner.remaining_cooldown(self.config.reset_timeout),
                });
            }
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) => {}
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    tracing::info!(
                        circuit = %self.name,
                        probes = inner.half_open_calls,
                        "Circuit breaker closing after successful probes"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.half_open_calls = 0;
                    inner.last_error_message = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        inner.last_failure_time = Some(Instant::now());
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failures,
                        error = %error,
                        "Circuit breaker opening after consecutive failures"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.half_open_calls = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the circuit closed and clears all counters.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> AppError {
        AppError::NetworkError("connection reset".into())
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_at_threshold() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_failure_threshold(3),
        );

        for _ in 0..2 {
            cb.record_failure(&network_error());
            assert_eq!(cb.state(), CircuitState::Closed);
        }

        cb.record_failure(&network_error());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_failure_threshold(5),
        );

        for _ in 0..4 {
            cb.record_failure(&network_error());
        }
        cb.record_success();
        assert_eq!(cb.stats().failure_count, 0);

        for _ in 0..4 {
            cb.record_failure(&network_error());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_does_not_transition_lazily() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(5)),
        );
        cb.record_failure(&network_error());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_denies_until_reset_timeout() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(30)),
        );
        cb.record_failure(&network_error());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_execute());
        assert_eq!(
            cb.stats().time_until_half_open,
            Some(Duration::from_secs(1))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_budget_of_successes() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(1))
                .with_half_open_max_calls(2),
        );
        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_budget_limits_admission() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(1))
                .with_half_open_max_calls(3),
        );
        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());

        cb.record_success();
        cb.record_success();
        assert!(cb.can_execute());
        assert_eq!(cb.stats().half_open_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_concurrent_probes() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(1))
                .with_half_open_max_calls(1),
        );
        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(1)).await;

        // Nothing has completed yet, so every probe is let through.
        for _ in 0..4 {
            assert!(cb.can_execute());
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_calls, 0);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(1))
                .with_half_open_max_calls(3),
        );
        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        cb.record_success();

        cb.record_failure(&network_error());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_extends_cooldown() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(10)),
        );
        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(8)).await;
        cb.record_failure(&network_error());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!cb.can_execute());
        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_recovery_cycle() {
        let cb = CircuitBreaker::new(
            "companies_house",
            CircuitBreakerConfig::default()
                .with_failure_threshold(2)
                .with_reset_timeout(Duration::from_secs(30))
                .with_half_open_max_calls(1),
        );

        for _ in 0..2 {
            let result = cb
                .execute(|| async { Err::<(), _>(network_error()) })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let result = cb.execute(|| async { Ok::<_, AppError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_rejects_without_running_operation() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(60)),
        );
        cb.record_failure(&network_error());

        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .execute(|| async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await;

        match result {
            Err(CircuitBreakerError::Open { name, retry_after }) => {
                assert_eq!(name, "test");
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected open error, got {other:?}"),
        }
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_ignores_cancellation() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );

        let _ = cb
            .execute(|| async { Err::<(), _>(AppError::Cancelled) })
            .await;

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        cb.record_failure(&network_error());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.stats().last_error.is_none());
    }

    #[test]
    fn test_open_error_converts_to_app_error() {
        let err: AppError = CircuitBreakerError::Open {
            name: "oc".into(),
            retry_after: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(err, AppError::CircuitOpen { .. }));
    }
}

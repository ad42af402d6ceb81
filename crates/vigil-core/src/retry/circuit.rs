//! Circuit breaker for flaky downstream calls.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, VigilError};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// A bounded number of probe calls decide reopen vs close.
    HalfOpen,
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub max_failures: u32,
    /// How long the breaker stays open before probing.
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

/// Three-state circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
        }
    }

    /// Current state. Reading while open checks the reset timeout and may
    /// transition to half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let cooled = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if cooled {
                debug!("circuit breaker half-open");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 0;
            }
        }
    }

    /// Try to reserve the right to run one call. Returns the open-sentinel
    /// error when the breaker rejects it.
    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(VigilError::CircuitOpen),
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Ok(())
                } else {
                    Err(VigilError::CircuitOpen)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            debug!("circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_calls = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker reopened by probe failure");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `call` under the breaker.
    ///
    /// When open, returns [`VigilError::CircuitOpen`] without constructing
    /// the future's work.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match call().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Like [`execute`](Self::execute), but routes the open-sentinel to a
    /// fallback. Genuine call failures are not masked.
    pub async fn execute_with_fallback<T, F, Fut, FB, FBFut>(
        &self,
        call: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FBFut,
        FBFut: Future<Output = Result<T>>,
    {
        match self.execute(call).await {
            Err(VigilError::CircuitOpen) => fallback().await,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(max_failures: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            max_failures,
            reset_timeout,
            half_open_max_calls: 1,
        })
    }

    async fn fail(b: &CircuitBreaker) -> Result<u32> {
        b.execute(|| async { Err::<u32, _>(VigilError::Download("boom".to_string())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32> {
        b.execute(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_trips_open_after_max_failures() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(fail(&b).await.is_err());
        }
        assert_eq!(b.state(), CircuitState::Open);

        // The protected function must not run while open.
        let mut invoked = false;
        let res = b
            .execute(|| {
                invoked = true;
                async { Ok(1) }
            })
            .await;
        assert!(matches!(res, Err(VigilError::CircuitOpen)));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, Duration::from_secs(60));
        assert!(fail(&b).await.is_err());
        assert!(fail(&b).await.is_err());
        assert!(succeed(&b).await.is_ok());
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let b = breaker(1, Duration::from_millis(20));
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(20));
        assert!(fail(&b).await.is_err());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_bounded_probes() {
        let b = breaker(1, Duration::from_millis(10));
        assert!(fail(&b).await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // One probe slot: a second concurrent-style admit is rejected.
        assert!(b.admit().is_ok());
        assert!(matches!(b.admit(), Err(VigilError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_fallback_runs_only_when_open() {
        let b = breaker(1, Duration::from_secs(60));
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        let value = b
            .execute_with_fallback(|| async { Ok(1) }, || async { Ok(99) })
            .await
            .unwrap();
        assert_eq!(value, 99);

        // A genuine failure in a closed breaker is not masked.
        let b = breaker(5, Duration::from_secs(60));
        let res = b
            .execute_with_fallback(
                || async { Err::<u32, _>(VigilError::Download("boom".to_string())) },
                || async { Ok(99) },
            )
            .await;
        assert!(matches!(res, Err(VigilError::Download(_))));
    }
}

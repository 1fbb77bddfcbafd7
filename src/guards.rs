//! Call-admission guards: sliding-window rate limiting and circuit
//! breaking.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 100, window: Duration::from_secs(60) }
    }
}

/// True sliding-window limiter.
///
/// Each key keeps the timestamps of its admitted calls; entries older than
/// the window are evicted on every check, so the window slides instead of
/// resetting at bucket boundaries.
pub struct RateLimiter {
    config: RateLimitConfig,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, hits: Mutex::new(HashMap::new()) }
    }

    /// Admits or rejects one call attributed to `key`.
    pub fn check(&self, key: &str) -> CoreResult<()> {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let window = hits.entry(key.to_string()).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.config.max_requests {
            return Err(CoreError::RateLimitExceeded {
                key: key.to_string(),
                max_requests: self.config.max_requests,
                window_ms: self.config.window.as_millis() as u64,
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Admitted calls currently inside the window for `key`.
    pub fn current(&self, key: &str) -> u32 {
        let now = Instant::now();
        self.hits
            .lock()
            .get(key)
            .map(|w| {
                w.iter()
                    .filter(|&&t| now.duration_since(t) < self.config.window)
                    .count() as u32
            })
            .unwrap_or(0)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside `window` that trip the circuit open.
    pub error_threshold: u32,
    /// Window for counting failures while closed.
    pub window: Duration,
    /// Cooldown before an open circuit allows its half-open trial.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed,
    Open(Instant),
    /// One trial call is in flight; everyone else fails fast.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: State,
    failures: Vec<Instant>,
}

/// Three-state breaker: closed → open on repeated failure, open →
/// half-open after the cooldown, half-open → closed on a successful trial
/// or back to open on a failed one. Exactly one trial call is admitted
/// while half-open.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner { state: State::Closed, failures: Vec::new() }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, for diagnostics.
    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            State::Closed => CircuitState::Closed,
            State::Open(_) => CircuitState::Open,
            State::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Admission check. The caller that flips open → half-open owns the
    /// single trial; it must report the outcome via [`Self::on_success`]
    /// or [`Self::on_failure`].
    pub fn preflight(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Ok(()),
            State::HalfOpen => Err(self.open_error()),
            State::Open(opened_at) => {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
        }
    }

    /// Reports a successful call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Closed;
                inner.failures.clear();
            }
            State::Closed => {
                let now = Instant::now();
                let window = self.config.window;
                inner.failures.retain(|&at| now.duration_since(at) < window);
            }
            State::Open(_) => {}
        }
    }

    /// Reports a failed call.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open(Instant::now());
            }
            State::Closed => {
                let now = Instant::now();
                inner.failures.push(now);
                let window = self.config.window;
                inner.failures.retain(|&at| now.duration_since(at) < window);
                if inner.failures.len() as u32 >= self.config.error_threshold {
                    tracing::warn!(target: "crosscut", circuit = %self.name, "circuit opened");
                    inner.state = State::Open(now);
                }
            }
            State::Open(_) => {}
        }
    }

    /// Runs `operation` under the breaker, recording its outcome.
    pub async fn call<T, F, Fut>(&self, operation: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CoreResult<T>>,
    {
        self.preflight()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(error)
            }
        }
    }

    fn open_error(&self) -> CoreError {
        CoreError::CircuitOpen { name: self.name.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                error_threshold: threshold,
                window: Duration::from_secs(60),
                reset_timeout: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn sliding_window_evicts_old_hits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_millis(40),
        });

        assert!(limiter.check("ip-1").is_ok());
        assert!(limiter.check("ip-1").is_ok());
        assert!(matches!(
            limiter.check("ip-1"),
            Err(CoreError::RateLimitExceeded { .. })
        ));
        // Other keys are independent windows.
        assert!(limiter.check("ip-2").is_ok());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("ip-1").is_ok());
    }

    #[tokio::test]
    async fn breaker_opens_at_threshold_and_fails_fast() {
        let breaker = fast_breaker(2);

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(CoreError::msg("down")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fail-fast without invoking the operation.
        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok::<_, CoreError>(1) }
            })
            .await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_trial_success_closes() {
        let breaker = fast_breaker(1);
        let _ = breaker
            .call(|| async { Err::<(), _>(CoreError::msg("down")) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = breaker.call(|| async { Ok::<_, CoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_failure_reopens() {
        let breaker = fast_breaker(1);
        let _ = breaker
            .call(|| async { Err::<(), _>(CoreError::msg("down")) })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = breaker
            .call(|| async { Err::<(), _>(CoreError::msg("still down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        let breaker = fast_breaker(1);
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(60));

        assert!(breaker.preflight().is_ok());
        // Trial in flight: everyone else is rejected.
        assert!(matches!(
            breaker.preflight(),
            Err(CoreError::CircuitOpen { .. })
        ));

        breaker.on_success();
        assert!(breaker.preflight().is_ok());
    }
}

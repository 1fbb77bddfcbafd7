//! Retry execution with bounded attempts and configurable backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Delay progression between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every delay equals `initial_delay`.
    Fixed,
    /// Delay grows as `initial_delay * attempt`.
    Linear,
    /// Delay grows as `initial_delay * multiplier^(attempt - 1)`.
    Exponential,
}

type RetryPredicate = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;
type RetryHook = Arc<dyn Fn(u32, &CoreError) + Send + Sync>;

/// Retry policy: bounded attempts, a backoff schedule, a predicate that
/// decides which failures are worth retrying, and an observability hook.
///
/// The policy is also the executor: [`RetryPolicy::execute`] runs an async
/// operation under it. Exhaustion rethrows the final attempt's error
/// unchanged, so callers cannot distinguish "failed once" from "failed
/// after N attempts" except through logs.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Upper bound on invocations of the operation. `1` means no retries.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
    pub backoff_multiplier: f64,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    should_retry: RetryPredicate,
    on_retry: RetryHook,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            // Guard rejections and validation failures are deterministic;
            // retrying them only burns the window.
            should_retry: Arc::new(|err| {
                !err.is_guard_rejection() && !matches!(err, CoreError::Validation(_))
            }),
            on_retry: Arc::new(|attempt, err| {
                tracing::debug!(target: "crosscut", attempt, "retrying after failure: {err}");
            }),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replaces the retryability predicate.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Replaces the per-retry hook. The hook observes; it cannot alter
    /// control flow.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &CoreError) + Send + Sync + 'static,
    {
        self.on_retry = Arc::new(hook);
        self
    }

    /// Delay scheduled after the failure of attempt `attempt` (1-based),
    /// clamped to `max_delay`.
    ///
    /// Linear and exponential schedules are monotonically non-decreasing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let raw = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Linear => base * attempt as f64,
            Backoff::Exponential => base * self.backoff_multiplier.powi(attempt as i32 - 1),
        };
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `operation` under this policy.
    ///
    /// Success returns immediately. A failure that exhausts `max_attempts`
    /// or that `should_retry` declines is rethrown unchanged.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts || !(self.should_retry)(&error) {
                        return Err(error);
                    }
                    let delay = self.delay_for(attempt);
                    (self.on_retry)(attempt, &error);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff", &self.backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_double_and_cap() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(400));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(400));
    }

    #[test]
    fn linear_delays_are_monotone() {
        let policy = RetryPolicy::new(4)
            .with_backoff(Backoff::Linear)
            .with_initial_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(1));

        let delays: Vec<_> = (1..=3).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(150)
            ]
        );
    }

    #[test]
    fn fixed_delay_ignores_attempt_number() {
        let policy = RetryPolicy::new(4)
            .with_backoff(Backoff::Fixed)
            .with_initial_delay(Duration::from_millis(25));
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn default_predicate_rejects_guard_errors() {
        let policy = RetryPolicy::default();
        let limited = CoreError::RateLimitExceeded {
            key: "k".to_string(),
            max_requests: 1,
            window_ms: 1000,
        };
        assert!(!(policy.should_retry)(&limited));
        assert!((policy.should_retry)(&CoreError::msg("transient")));
    }
}

//! The interceptor engine: higher-order wrappers over async service
//! methods.
//!
//! A wrapped method is a [`Method<A, T>`]: an `Arc`'d closure from an
//! argument tuple to a boxed future of [`CoreResult<T>`]. Every wrapper
//! takes a method and returns a method with the same signature, so
//! cross-cutting behavior is acquired at service-construction time without
//! bespoke code per method:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crosscut::{
//!     method, CacheAdapter, CacheOptions, CoreResult, MethodBuilder, RetryPolicy,
//! };
//!
//! # async fn example() -> CoreResult<()> {
//! let cache = Arc::new(CacheAdapter::in_memory("booking"));
//!
//! let find_slots = MethodBuilder::new(
//!     "BookingService.find_slots",
//!     method(|(provider_id, day): (String, u32)| async move {
//!         // ...repository lookup...
//!         Ok::<_, crosscut::CoreError>(vec![format!("{provider_id}:{day}")])
//!     }),
//! )
//! .cached(cache, CacheOptions { ttl: Duration::from_secs(60) })
//! .retried(RetryPolicy::new(3))
//! .build();
//!
//! let slots = find_slots(("p-1".to_string(), 14)).await?;
//! assert_eq!(slots, vec!["p-1:14".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! Composition order is deterministic: each wrapper (and each builder
//! step) wraps the chain built so far, so the **last** layer applied is
//! the outermost and observes the final result or error of everything
//! inside it. In the example above retry is outermost; a cache hit inside
//! it returns before the retry loop ever matters.
//!
//! Wrappers never swallow the inner failure. The single documented
//! exception is cache availability: a failing cache store degrades to a
//! miss (see [`crate::cache`]).

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{cache_key, CacheAdapter};
use crate::error::{CoreError, CoreResult, FieldError};
use crate::guards::{CircuitBreaker, RateLimiter};
use crate::observe::{ErrorTracker, LogFields, LogLevel, Logger, PerformanceRecorder};
use crate::retry::RetryPolicy;
use crate::schema::{self, Schema};

/// Boxed future returned by wrapped methods.
pub type MethodFuture<T> = Pin<Box<dyn Future<Output = CoreResult<T>> + Send>>;

/// A service method after wrapping: same call signature at every layer.
pub type Method<A, T> = Arc<dyn Fn(A) -> MethodFuture<T> + Send + Sync>;

/// Key derivation for rate limiting (caller IP, tenant id, ...).
pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// Lifts an async closure into a [`Method`].
pub fn method<A, T, F, Fut>(f: F) -> Method<A, T>
where
    A: Send + 'static,
    T: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<T>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

fn args_value<A: Serialize>(args: &A) -> Option<Value> {
    serde_json::to_value(args).ok()
}

fn positional(args: Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

// Emission helpers: a panicking collaborator must never fail the call.
fn emit(logger: &dyn Logger, level: LogLevel, message: &str, fields: &LogFields) {
    let _ = catch_unwind(AssertUnwindSafe(|| logger.log(level, message, fields)));
}

fn track(tracker: &dyn ErrorTracker, error: &CoreError, context: &LogFields) {
    let _ = catch_unwind(AssertUnwindSafe(|| tracker.capture(error, context)));
}

/// Options for the Log interceptor.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: LogLevel,
    /// When false, argument values are masked in the record.
    pub include_args: bool,
    /// When true, successful results are serialized into the record.
    pub include_result: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { level: LogLevel::Info, include_args: false, include_result: false }
    }
}

/// Structured call logging plus error forwarding.
///
/// Emits one record per invocation (level, masked arguments, execution
/// time, outcome) and forwards failures to the error tracker. Neither the
/// logger nor the tracker can fail or block the wrapped call.
pub fn with_logging<A, T>(
    name: &str,
    inner: Method<A, T>,
    logger: Arc<dyn Logger>,
    tracker: Arc<dyn ErrorTracker>,
    options: LogOptions,
) -> Method<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + Send + 'static,
{
    let name = name.to_string();
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let logger = logger.clone();
        let tracker = tracker.clone();
        let options = options.clone();
        let name = name.clone();

        let rendered_args = if options.include_args {
            args_value(&args).unwrap_or(Value::Null)
        } else {
            Value::String("[masked]".to_string())
        };

        Box::pin(async move {
            let started = Instant::now();
            let result = inner(args).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            let mut fields = LogFields::new();
            fields.insert("method".to_string(), Value::String(name.clone()));
            fields.insert("args".to_string(), rendered_args);
            fields.insert("duration_ms".to_string(), serde_json::json!(elapsed_ms));

            match &result {
                Ok(value) => {
                    fields.insert("outcome".to_string(), Value::String("success".to_string()));
                    if options.include_result {
                        let rendered = serde_json::to_value(value).unwrap_or(Value::Null);
                        fields.insert("result".to_string(), rendered);
                    }
                    emit(&*logger, options.level, &format!("{name} completed"), &fields);
                }
                Err(error) => {
                    fields.insert("outcome".to_string(), Value::String("failure".to_string()));
                    fields.insert("error".to_string(), Value::String(error.to_string()));
                    emit(&*logger, LogLevel::Error, &format!("{name} failed"), &fields);
                    track(&*tracker, error, &fields);
                }
            }

            result
        })
    })
}

/// One validated parameter: positional index, display name, schema.
#[derive(Clone)]
pub struct ValidationRule {
    pub param_index: usize,
    pub param_name: String,
    pub schema: Arc<dyn Schema>,
}

impl ValidationRule {
    pub fn new(param_index: usize, param_name: impl Into<String>, schema: Arc<dyn Schema>) -> Self {
        Self { param_index, param_name: param_name.into(), schema }
    }
}

/// Rejects an invocation before the inner method runs if any rule fails.
///
/// Every rule is evaluated; the resulting [`CoreError::Validation`]
/// carries all failures, never just the first.
pub fn with_validation<A, T>(inner: Method<A, T>, rules: Vec<ValidationRule>) -> Method<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: 'static,
{
    let rules = Arc::new(rules);
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let rules = rules.clone();

        let serialized = args_value(&args).map(positional);

        Box::pin(async move {
            let values = match serialized {
                Some(values) => values,
                None => {
                    return Err(CoreError::Validation(vec![FieldError {
                        param_index: 0,
                        param_name: "<arguments>".to_string(),
                        messages: vec!["arguments could not be serialized for validation".to_string()],
                    }]))
                }
            };

            let mut failures = Vec::new();
            for rule in rules.iter() {
                let report = match values.get(rule.param_index) {
                    Some(value) => schema::validate(value, &*rule.schema),
                    None => schema::validate(&Value::Null, &*rule.schema),
                };
                if !report.valid {
                    failures.push(FieldError {
                        param_index: rule.param_index,
                        param_name: rule.param_name.clone(),
                        messages: report.errors,
                    });
                }
            }

            if !failures.is_empty() {
                return Err(CoreError::Validation(failures));
            }

            inner(args).await
        })
    })
}

/// Options for the Cacheable interceptor.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300) }
    }
}

/// Read-through caching keyed on method identity plus arguments.
///
/// A hit short-circuits the inner call. On a miss the inner method runs
/// and the result is stored only if it succeeded; failures are never
/// cached. Arguments that cannot be serialized bypass the cache entirely.
pub fn with_cache<A, T>(
    name: &str,
    inner: Method<A, T>,
    cache: Arc<CacheAdapter>,
    options: CacheOptions,
) -> Method<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let name = name.to_string();
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let cache = cache.clone();
        let ttl = options.ttl;
        let key = args_value(&args).map(|v| cache_key(&name, &v));

        Box::pin(async move {
            let key = match key {
                Some(key) => key,
                None => return inner(args).await,
            };

            if let Some(hit) = cache.get(&key).await {
                if let Ok(value) = serde_json::from_value::<T>(hit) {
                    return Ok(value);
                }
                // Undecodable entry: fall through as a miss.
            }

            let result = inner(args).await?;
            if let Ok(serialized) = serde_json::to_value(&result) {
                cache.set(&key, serialized, ttl).await;
            }
            Ok(result)
        })
    })
}

/// Deletes matching cache entries after a successful inner call.
///
/// Runs only on success; a failed call leaves the cache untouched (stale
/// entries on failure are accepted, not rolled forward).
pub fn with_cache_invalidation<A, T>(
    inner: Method<A, T>,
    cache: Arc<CacheAdapter>,
    pattern: impl Into<String>,
) -> Method<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    let pattern = pattern.into();
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let cache = cache.clone();
        let pattern = pattern.clone();

        Box::pin(async move {
            let result = inner(args).await?;
            let deleted = cache.delete_pattern(&pattern).await;
            tracing::debug!(target: "crosscut", pattern = %pattern, deleted, "cache invalidated");
            Ok(result)
        })
    })
}

/// Runs the inner method under a [`RetryPolicy`].
pub fn with_retry<A, T>(inner: Method<A, T>, policy: RetryPolicy) -> Method<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let policy = policy.clone();
        Box::pin(async move { policy.execute(|| inner(args.clone())).await })
    })
}

/// Admission control through a sliding-window [`RateLimiter`].
///
/// The window key defaults to the method name; pass a [`KeyFn`] to key by
/// caller identity instead.
pub fn with_rate_limit<A, T>(
    name: &str,
    inner: Method<A, T>,
    limiter: Arc<RateLimiter>,
    key_fn: Option<KeyFn<A>>,
) -> Method<A, T>
where
    A: Send + Sync + 'static,
    T: 'static,
{
    let name = name.to_string();
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let limiter = limiter.clone();
        let key = match &key_fn {
            Some(f) => f(&args),
            None => name.clone(),
        };

        Box::pin(async move {
            limiter.check(&key)?;
            inner(args).await
        })
    })
}

/// Wraps the inner method in a [`CircuitBreaker`].
pub fn with_circuit_breaker<A, T>(inner: Method<A, T>, breaker: Arc<CircuitBreaker>) -> Method<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let breaker = breaker.clone();
        Box::pin(async move {
            breaker.preflight()?;
            match inner(args).await {
                Ok(value) => {
                    breaker.on_success();
                    Ok(value)
                }
                Err(error) => {
                    breaker.on_failure();
                    Err(error)
                }
            }
        })
    })
}

/// Options for the Audit interceptor.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Business action recorded in the trail, e.g. `"booking.cancel"`.
    pub action: String,
    pub include_args: bool,
}

impl AuditOptions {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: action.into(), include_args: true }
    }
}

/// Writes an audit record after every invocation, success or failure.
pub fn with_audit<A, T>(
    inner: Method<A, T>,
    logger: Arc<dyn Logger>,
    options: AuditOptions,
) -> Method<A, T>
where
    A: Serialize + Send + Sync + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let logger = logger.clone();
        let options = options.clone();
        let rendered_args = if options.include_args {
            args_value(&args).unwrap_or(Value::Null)
        } else {
            Value::String("[masked]".to_string())
        };

        Box::pin(async move {
            let started = Instant::now();
            let result = inner(args).await;

            let mut fields = LogFields::new();
            fields.insert("action".to_string(), Value::String(options.action.clone()));
            fields.insert("args".to_string(), rendered_args);
            fields.insert(
                "outcome".to_string(),
                Value::String(if result.is_ok() { "success" } else { "failure" }.to_string()),
            );
            fields.insert(
                "duration_ms".to_string(),
                serde_json::json!(started.elapsed().as_secs_f64() * 1000.0),
            );
            emit(&*logger, LogLevel::Info, "audit", &fields);

            result
        })
    })
}

/// Options for the Performance interceptor.
#[derive(Debug, Clone, Default)]
pub struct TimingOptions {
    /// Invocations slower than this are additionally logged at warn level.
    pub slow_threshold: Option<Duration>,
}

/// Records execution time into a shared [`PerformanceRecorder`].
pub fn with_timing<A, T>(
    name: &str,
    inner: Method<A, T>,
    recorder: Arc<PerformanceRecorder>,
    options: TimingOptions,
) -> Method<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    let name = name.to_string();
    Arc::new(move |args: A| {
        let inner = inner.clone();
        let recorder = recorder.clone();
        let name = name.clone();
        let slow_threshold = options.slow_threshold;

        Box::pin(async move {
            let started = Instant::now();
            let result = inner(args).await;
            let elapsed = started.elapsed();
            recorder.record(&name, elapsed);
            if let Some(threshold) = slow_threshold {
                if elapsed > threshold {
                    tracing::warn!(
                        target: "crosscut",
                        method = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "slow call"
                    );
                }
            }
            result
        })
    })
}

/// Fluent composition of interceptors around one method.
///
/// Each step wraps the chain built so far: the last step declared becomes
/// the outermost layer and sees the final result or error of everything
/// inside it. A kind is attached at most once per method; the built
/// [`Method`] is immutable.
///
/// ```rust
/// use std::sync::Arc;
/// use crosscut::{method, CoreError, MethodBuilder, TracingLogger, NullTracker, LogOptions};
///
/// # async fn example() {
/// let double = MethodBuilder::new(
///     "MathService.double",
///     method(|(n,): (i64,)| async move { Ok::<_, CoreError>(n * 2) }),
/// )
/// .logged(Arc::new(TracingLogger), Arc::new(NullTracker), LogOptions::default())
/// .build();
///
/// assert_eq!(double((21,)).await.unwrap(), 42);
/// # }
/// ```
pub struct MethodBuilder<A, T> {
    name: String,
    method: Method<A, T>,
}

impl<A, T> MethodBuilder<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    pub fn new(name: impl Into<String>, method: Method<A, T>) -> Self {
        Self { name: name.into(), method }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validated(mut self, rules: Vec<ValidationRule>) -> Self
    where
        A: Serialize + Sync,
    {
        self.method = with_validation(self.method, rules);
        self
    }

    pub fn cached(mut self, cache: Arc<CacheAdapter>, options: CacheOptions) -> Self
    where
        A: Serialize + Sync,
        T: Serialize + DeserializeOwned,
    {
        self.method = with_cache(&self.name, self.method, cache, options);
        self
    }

    pub fn invalidates(mut self, cache: Arc<CacheAdapter>, pattern: impl Into<String>) -> Self {
        self.method = with_cache_invalidation(self.method, cache, pattern);
        self
    }

    pub fn retried(mut self, policy: RetryPolicy) -> Self
    where
        A: Clone + Sync,
    {
        self.method = with_retry(self.method, policy);
        self
    }

    pub fn rate_limited(mut self, limiter: Arc<RateLimiter>, key_fn: Option<KeyFn<A>>) -> Self
    where
        A: Sync,
    {
        self.method = with_rate_limit(&self.name, self.method, limiter, key_fn);
        self
    }

    pub fn guarded(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.method = with_circuit_breaker(self.method, breaker);
        self
    }

    pub fn audited(mut self, logger: Arc<dyn Logger>, options: AuditOptions) -> Self
    where
        A: Serialize + Sync,
    {
        self.method = with_audit(self.method, logger, options);
        self
    }

    pub fn timed(mut self, recorder: Arc<PerformanceRecorder>, options: TimingOptions) -> Self {
        self.method = with_timing(&self.name, self.method, recorder, options);
        self
    }

    pub fn logged(
        mut self,
        logger: Arc<dyn Logger>,
        tracker: Arc<dyn ErrorTracker>,
        options: LogOptions,
    ) -> Self
    where
        A: Serialize + Sync,
        T: Serialize,
    {
        self.method = with_logging(&self.name, self.method, logger, tracker, options);
        self
    }

    pub fn build(self) -> Method<A, T> {
        self.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positional_handles_tuples_units_and_scalars() {
        assert_eq!(positional(json!(["a", 1])), vec![json!("a"), json!(1)]);
        assert_eq!(positional(Value::Null), Vec::<Value>::new());
        assert_eq!(positional(json!(7)), vec![json!(7)]);
    }

    #[test]
    fn single_element_tuples_serialize_positionally() {
        let value = args_value(&("only".to_string(),)).unwrap();
        assert_eq!(positional(value), vec![json!("only")]);
    }
}

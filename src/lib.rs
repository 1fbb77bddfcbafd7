//! # crosscut
//!
//! Cross-cutting infrastructure for async Rust services: declarative
//! method interception plus dependency wiring.
//!
//! ## Features
//!
//! - **Interceptors**: logging, read-through caching with glob
//!   invalidation, retry with backoff, aggregated schema validation,
//!   sliding-window rate limiting, circuit breaking, audit, and timing —
//!   acquired by wrapping, not by bespoke code per method
//! - **Deterministic composition**: each wrapper layer fully delegates to
//!   the one inside it; the last layer applied is the outermost
//! - **Service container**: named factories, lazy singletons,
//!   circular-dependency detection with guaranteed cleanup, explicit test
//!   overrides, reset
//! - **Soft-failing cache**: an unreachable cache store degrades to
//!   misses and best-effort writes, never to caller-visible errors
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crosscut::{
//!     method, CacheAdapter, CacheOptions, CoreError, MethodBuilder, RetryPolicy,
//!     ServiceContainer,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // Wire shared infrastructure through the container.
//! let container = ServiceContainer::new();
//! container.register_singleton(|_| Ok(CacheAdapter::in_memory("demo")));
//!
//! let cache = container.resolve::<CacheAdapter>().unwrap();
//!
//! // A domain method acquires caching and retry by wrapping.
//! let lookup = MethodBuilder::new(
//!     "CustomerService.lookup",
//!     method(|(id,): (u64,)| async move { Ok::<_, CoreError>(format!("customer-{id}")) }),
//! )
//! .cached(cache, CacheOptions { ttl: Duration::from_secs(30) })
//! .retried(RetryPolicy::new(3))
//! .build();
//!
//! assert_eq!(lookup((7,)).await.unwrap(), "customer-7");
//! # }
//! ```
//!
//! ## Service Container
//!
//! ```rust
//! use crosscut::{CoreError, ServiceContainer};
//!
//! struct AppointmentRepository;
//!
//! let container = ServiceContainer::new();
//! container.register_singleton(|_| Ok(AppointmentRepository));
//!
//! assert!(container.has::<AppointmentRepository>());
//! assert!(matches!(
//!     container.resolve::<String>(),
//!     Err(CoreError::NotRegistered(_))
//! ));
//! ```

pub mod cache;
pub mod container;
pub mod error;
pub mod guards;
pub mod intercept;
pub mod observe;
pub mod retry;
pub mod schema;

pub use cache::{cache_key, CacheAdapter, CacheConfig, CacheStore, MemoryStore};
pub use container::{key_of, AnyArc, Key, ServiceContainer};
pub use error::{CoreError, CoreResult, FieldError};
pub use guards::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimiter,
};
pub use intercept::{
    method, with_audit, with_cache, with_cache_invalidation, with_circuit_breaker, with_logging,
    with_rate_limit, with_retry, with_timing, with_validation, AuditOptions, CacheOptions, KeyFn,
    LogOptions, Method, MethodBuilder, MethodFuture, TimingOptions, ValidationRule,
};
pub use observe::{
    ErrorTracker, LogFields, LogLevel, Logger, NullTracker, PerfStats, PerformanceRecorder,
    TracingLogger, TracingTracker,
};
pub use retry::{Backoff, RetryPolicy};
pub use schema::{
    non_empty_string, positive_number, typed, validate, Schema, SchemaReport, TypedSchema,
};

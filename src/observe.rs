//! Observability collaborators: logging, error tracking, and timing.
//!
//! Interceptors only ever talk to the [`Logger`] and [`ErrorTracker`]
//! traits; the `tracing`-backed defaults are what production services wire
//! in, and tests substitute recording fakes.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

/// Severity for structured log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured fields attached to a log record.
pub type LogFields = serde_json::Map<String, Value>;

/// Logging collaborator.
///
/// Implementations must not fail the calling code path; the interceptor
/// engine additionally isolates every emission so that even a panicking
/// logger cannot fail a wrapped call.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields);
}

/// Default logger forwarding to the `tracing` ecosystem.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields) {
        let fields = Value::Object(fields.clone());
        match level {
            LogLevel::Debug => tracing::debug!(target: "crosscut", %fields, "{}", message),
            LogLevel::Info => tracing::info!(target: "crosscut", %fields, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "crosscut", %fields, "{}", message),
            LogLevel::Error => tracing::error!(target: "crosscut", %fields, "{}", message),
        }
    }
}

/// Error-tracking collaborator. Fire-and-forget: implementations must not
/// block and must not fail the wrapped call.
pub trait ErrorTracker: Send + Sync {
    fn capture(&self, error: &crate::CoreError, context: &LogFields);
}

/// Tracker that drops every report. Useful as a default and in tests.
#[derive(Debug, Default)]
pub struct NullTracker;

impl ErrorTracker for NullTracker {
    fn capture(&self, _error: &crate::CoreError, _context: &LogFields) {}
}

/// Tracker that reports through `tracing` at error level, for deployments
/// without a dedicated collector.
#[derive(Debug, Default)]
pub struct TracingTracker;

impl ErrorTracker for TracingTracker {
    fn capture(&self, error: &crate::CoreError, context: &LogFields) {
        let context = Value::Object(context.clone());
        tracing::error!(target: "crosscut", %context, "captured: {}", error);
    }
}

/// Aggregated timing for one wrapped method.
#[derive(Debug, Clone)]
pub struct PerfStats {
    pub call_count: u64,
    pub total_time: Duration,
    pub average_time: Duration,
}

#[derive(Debug, Default)]
struct PerfInner {
    call_counts: HashMap<String, u64>,
    total_times: HashMap<String, Duration>,
    slowest: Vec<(String, Duration)>,
}

/// Shared sink for the timing interceptor.
///
/// Tracks per-method call counts and cumulative durations, and keeps the
/// slowest recorded calls (capped at 100) for diagnostics.
#[derive(Debug, Default)]
pub struct PerformanceRecorder {
    inner: Mutex<PerfInner>,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed invocation of `method`.
    pub fn record(&self, method: &str, duration: Duration) {
        let mut inner = self.inner.lock();
        *inner.call_counts.entry(method.to_string()).or_insert(0) += 1;
        *inner
            .total_times
            .entry(method.to_string())
            .or_insert(Duration::ZERO) += duration;

        inner.slowest.push((method.to_string(), duration));
        inner.slowest.sort_by(|a, b| b.1.cmp(&a.1));
        inner.slowest.truncate(100);
    }

    /// Snapshot of aggregated stats per method.
    pub fn stats(&self) -> HashMap<String, PerfStats> {
        let inner = self.inner.lock();
        inner
            .call_counts
            .iter()
            .map(|(method, &count)| {
                let total = inner.total_times.get(method).copied().unwrap_or_default();
                let average = if count > 0 { total / count as u32 } else { Duration::ZERO };
                (
                    method.clone(),
                    PerfStats {
                        call_count: count,
                        total_time: total,
                        average_time: average,
                    },
                )
            })
            .collect()
    }

    /// The slowest recorded calls, most expensive first.
    pub fn slowest(&self) -> Vec<(String, Duration)> {
        self.inner.lock().slowest.clone()
    }
}

//! Error types shared by the interceptor engine and the service container.

use thiserror::Error;

/// A single failed validation rule, tagged with the parameter it applies to.
///
/// Collected by the Validate interceptor; a rejected call carries one
/// `FieldError` per failing rule, never just the first one.
#[derive(Debug, Clone)]
pub struct FieldError {
    /// Zero-based index of the validated positional argument.
    pub param_index: usize,
    /// Declared name of the parameter, used in messages and logs.
    pub param_name: String,
    /// Messages produced by the schema for this parameter.
    pub messages: Vec<String>,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.param_name, self.messages.join(", "))
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by interceptors and the service container.
///
/// Business failures from wrapped methods travel through the engine as
/// [`CoreError::Service`] with their concrete type intact, so a caller can
/// still downcast after any number of interceptor layers:
///
/// ```rust
/// use crosscut::CoreError;
///
/// let err = CoreError::service(std::io::Error::new(
///     std::io::ErrorKind::ConnectionRefused,
///     "store offline",
/// ));
/// assert!(err.service_ref::<std::io::Error>().is_some());
/// assert_eq!(err.to_string(), "store offline");
/// ```
#[derive(Debug, Error)]
pub enum CoreError {
    /// One or more validation rules failed; the list is always complete.
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// The sliding window for `key` is full.
    #[error("rate limit exceeded for {key}: more than {max_requests} requests in {window_ms}ms")]
    RateLimitExceeded {
        key: String,
        max_requests: u32,
        window_ms: u64,
    },

    /// The circuit protecting `name` is open and the call was not attempted.
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    /// `resolve` was called for a key that was never registered.
    #[error("service not registered: {0}")]
    NotRegistered(&'static str),

    /// A factory re-entered resolution of its own key.
    #[error("circular dependency detected while resolving {0}")]
    CircularDependency(&'static str),

    /// A registered instance could not be downcast to the requested type.
    #[error("type mismatch resolving {0}")]
    TypeMismatch(&'static str),

    /// The backing cache store failed. Never surfaced to callers of a
    /// wrapped method; the adapter absorbs it as a miss.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A failure from the wrapped business method, carried unchanged.
    #[error("{0}")]
    Service(Box<dyn std::error::Error + Send + Sync>),
}

impl CoreError {
    /// Wraps a business error without losing its type or message.
    pub fn service<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CoreError::Service(Box::new(error))
    }

    /// Builds a [`CoreError::Service`] from a bare message.
    pub fn msg(message: impl Into<String>) -> Self {
        CoreError::Service(Box::new(MessageError(message.into())))
    }

    /// Downcasts the carried business error, if this is a `Service` error
    /// of type `E`.
    pub fn service_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            CoreError::Service(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// True for guard rejections that the default retry predicate treats
    /// as terminal.
    pub fn is_guard_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::RateLimitExceeded { .. } | CoreError::CircuitOpen { .. }
        )
    }
}

#[derive(Debug)]
struct MessageError(String);

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

/// Result type used throughout crosscut.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = CoreError::Validation(vec![
            FieldError {
                param_index: 0,
                param_name: "email".to_string(),
                messages: vec!["must not be empty".to_string()],
            },
            FieldError {
                param_index: 1,
                param_name: "slots".to_string(),
                messages: vec!["must be positive".to_string()],
            },
        ]);

        let rendered = err.to_string();
        assert!(rendered.contains("email"));
        assert!(rendered.contains("slots"));
    }

    #[test]
    fn service_ref_only_matches_service_errors() {
        let err = CoreError::NotRegistered("BookingService");
        assert!(err.service_ref::<std::io::Error>().is_none());

        let err = CoreError::msg("boom");
        assert!(err.service_ref::<std::io::Error>().is_none());
        assert_eq!(err.to_string(), "boom");
    }
}

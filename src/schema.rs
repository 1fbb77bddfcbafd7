//! Schema validation with a uniform, non-throwing result.
//!
//! The Validate interceptor hands each declared positional argument to a
//! [`Schema`] collaborator and aggregates the outcomes. Collaborators are
//! free to panic; [`validate`] normalizes that into a failing
//! [`SchemaReport`] so a wrapped call can never be taken down by its own
//! argument checking.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of checking one value against one schema.
#[derive(Debug, Clone)]
pub struct SchemaReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaReport {
    fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self { valid: false, errors }
    }
}

/// Schema collaborator contract.
///
/// Implemented directly, via any closure of the matching shape, or through
/// [`typed`] for serde-backed structural checks.
pub trait Schema: Send + Sync {
    fn check(&self, value: &Value) -> Result<(), Vec<String>>;
}

impl<F> Schema for F
where
    F: Fn(&Value) -> Result<(), Vec<String>> + Send + Sync,
{
    fn check(&self, value: &Value) -> Result<(), Vec<String>> {
        self(value)
    }
}

/// Checks `value` against `schema`, always returning a structured report.
///
/// A schema that returns `Err` produces a failing report with its
/// messages; a schema that panics produces a failing report describing
/// the panic instead of unwinding into the caller.
pub fn validate(value: &Value, schema: &dyn Schema) -> SchemaReport {
    match catch_unwind(AssertUnwindSafe(|| schema.check(value))) {
        Ok(Ok(())) => SchemaReport::ok(),
        Ok(Err(errors)) => SchemaReport::failed(errors),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&'static str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "schema panicked".to_string());
            SchemaReport::failed(vec![format!("schema panicked: {reason}")])
        }
    }
}

/// Structural schema backed by serde: the value must deserialize into `T`.
pub struct TypedSchema<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned,
{
    fn check(&self, value: &Value) -> Result<(), Vec<String>> {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(_) => Ok(()),
            Err(err) => Err(vec![err.to_string()]),
        }
    }
}

/// Schema accepting exactly the values that deserialize into `T`.
pub fn typed<T: DeserializeOwned>() -> TypedSchema<T> {
    TypedSchema { _marker: std::marker::PhantomData }
}

/// Schema accepting non-empty strings.
pub fn non_empty_string() -> impl Schema + 'static {
    |value: &Value| match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        Some(_) => Err(vec!["must not be empty".to_string()]),
        None => Err(vec!["must be a string".to_string()]),
    }
}

/// Schema accepting numbers strictly greater than zero.
pub fn positive_number() -> impl Schema + 'static {
    |value: &Value| match value.as_f64() {
        Some(n) if n > 0.0 => Ok(()),
        Some(_) => Err(vec!["must be positive".to_string()]),
        None => Err(vec!["must be a number".to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn closure_schema_reports_errors() {
        let report = validate(&json!(""), &non_empty_string());
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["must not be empty".to_string()]);

        let report = validate(&json!("hello"), &non_empty_string());
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn typed_schema_checks_structure() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct BookingRequest {
            customer_id: String,
            slots: u32,
        }

        let ok = validate(&json!({"customer_id": "c-1", "slots": 2}), &typed::<BookingRequest>());
        assert!(ok.valid);

        let bad = validate(&json!({"customer_id": "c-1"}), &typed::<BookingRequest>());
        assert!(!bad.valid);
        assert!(bad.errors[0].contains("slots"));
    }

    #[test]
    fn panicking_schema_becomes_failing_report() {
        let schema = |_: &Value| -> Result<(), Vec<String>> { panic!("collaborator bug") };
        let report = validate(&json!(1), &schema);
        assert!(!report.valid);
        assert!(report.errors[0].contains("collaborator bug"));
    }

    #[test]
    fn positive_number_rejects_zero_and_strings() {
        assert!(!validate(&json!(0), &positive_number()).valid);
        assert!(!validate(&json!("3"), &positive_number()).valid);
        assert!(validate(&json!(1.5), &positive_number()).valid);
    }
}

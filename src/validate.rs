//! Runtime shape checks for loosely typed input (JSON filters, raw records).

use serde_json::Value;

use crate::error::Error;

/// Name of a JSON value's type, as used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Build a validation error for a value of the wrong type.
pub fn type_error(name: &str, expected: &str, actual: &Value) -> Error {
    Error::Validation(format!(
        "{name} must be type {expected}. Actual: {}",
        type_name(actual)
    ))
}

/// Require `value` to be a non-empty string.
pub fn require_non_empty(name: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!(
            "{name} must be a non-empty string"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_error_names_expected_and_actual() {
        let err = type_error("filter.where.or", "Array", &json!({"status": "open"}));
        assert_eq!(
            err.to_string(),
            "validation error: filter.where.or must be type Array. Actual: Object"
        );
    }

    #[test]
    fn blank_strings_are_rejected() {
        assert!(require_non_empty("Job name", "  ").is_err());
        assert!(require_non_empty("Job name", "resize").is_ok());
    }
}

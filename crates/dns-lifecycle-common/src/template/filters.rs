//! Custom filters for manifest templates
//!
//! - `required`: fail if value is undefined or none
//! - `base64_encode`: encode a string for Secret data
//! - `to_json`: serialize a value (e.g. the provider config) as compact JSON

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind, Value};

/// Required filter - fails if value is undefined or none
///
/// Usage: `{{ providerConfig.target.recordType | required }}`
pub fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is undefined",
        ))
    } else {
        Ok(value)
    }
}

/// Base64 encode filter
///
/// Usage: `{{ value | base64_encode }}`
pub fn base64_encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// JSON serialization filter
///
/// The output is valid inside a single-quoted YAML scalar once quotes are
/// doubled, which the filter does.
///
/// Usage: `'{{ providerConfig | to_json }}'`
pub fn to_json(value: Value) -> Result<String, Error> {
    if value.is_undefined() {
        return Ok("null".to_string());
    }
    serde_json::to_string(&value)
        .map(|s| s.replace('\'', "''"))
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("to_json: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_missing_values() {
        assert!(required(Value::from("present")).is_ok());
        assert!(required(Value::UNDEFINED).is_err());
        assert!(required(Value::from(())).is_err());
    }

    #[test]
    fn base64_encodes() {
        assert_eq!(base64_encode("hello"), "aGVsbG8=");
        assert_eq!(base64_encode(""), "");
    }

    #[test]
    fn to_json_serializes_maps() {
        let value = Value::from_serialize(serde_json::json!({"zone": "example.org"}));
        assert_eq!(to_json(value).unwrap(), r#"{"zone":"example.org"}"#);
    }

    #[test]
    fn to_json_escapes_single_quotes() {
        let value = Value::from("it's");
        assert_eq!(to_json(value).unwrap(), r#""it''s""#);
    }

    #[test]
    fn to_json_undefined_is_null() {
        assert_eq!(to_json(Value::UNDEFINED).unwrap(), "null");
    }
}

//! Rendered-manifest YAML decoding via yaml-rust2
//!
//! Template output is a `---` separated stream. Each non-empty document is
//! decoded into a `serde_json::Value` so it can become a `DynamicObject`.
//! Documents left empty by conditional template blocks are dropped.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// A manifest stream that could not be decoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum YamlError {
    /// The stream is not valid YAML
    #[error("invalid YAML: {0}")]
    Syntax(String),
    /// Document `index` (0-based, counting empty ones) uses a construct
    /// that has no JSON equivalent
    #[error("document {index}: {message}")]
    Unsupported {
        /// Position of the document in the stream
        index: usize,
        /// What was rejected
        message: String,
    },
}

impl From<YamlError> for crate::Error {
    fn from(e: YamlError) -> Self {
        crate::Error::serialization(e.to_string())
    }
}

/// Decode every non-empty document of `input`
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError::Syntax(e.to_string()))?;
    let mut out = Vec::with_capacity(docs.len());
    for (index, doc) in docs.into_iter().enumerate() {
        let value =
            to_json(doc).map_err(|message| YamlError::Unsupported { index, message })?;
        if !value.is_null() {
            out.push(value);
        }
    }
    Ok(out)
}

fn to_json(node: Yaml) -> Result<Value, String> {
    Ok(match node {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        Yaml::String(s) => Value::String(s),
        real @ Yaml::Real(_) => {
            let f = real
                .as_f64()
                .ok_or_else(|| "malformed floating point number".to_string())?;
            // NaN and infinities have no JSON form
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(key_string(key)?, to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err("unresolved alias".to_string()),
        Yaml::BadValue => return Err("unparseable value".to_string()),
    })
}

fn key_string(key: Yaml) -> Result<String, String> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        other => Err(format!("mapping key {:?} is not a scalar", other)),
    }
}

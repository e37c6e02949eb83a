//! Values produced by expressions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use dbsh_client::Value;
use serde_json::{json, Value as JsonValue};

use crate::config::OptionValue;
use crate::error::{ShellError, ShellResult};

/// An expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Ordered map.
    Map(BTreeMap<String, ScriptValue>),
    /// The session's current result set.
    ResultSet,
}

impl ScriptValue {
    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Text(_) => "text",
            ScriptValue::Map(_) => "map",
            ScriptValue::ResultSet => "result set",
        }
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    /// Converts to JSON for inline printing.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ScriptValue::Null => JsonValue::Null,
            ScriptValue::Bool(b) => json!(b),
            ScriptValue::Int(i) => json!(i),
            ScriptValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ScriptValue::Text(s) => json!(s),
            ScriptValue::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ScriptValue::ResultSet => json!("<result set>"),
        }
    }

    /// Truth value for `AND`, `OR` and `NOT`.
    pub fn as_bool(&self) -> ShellResult<bool> {
        match self {
            ScriptValue::Bool(b) => Ok(*b),
            other => Err(ShellError::evaluation(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Loose equality: integers and floats compare by value.
    pub fn loose_eq(&self, other: &ScriptValue) -> bool {
        match (self, other) {
            (ScriptValue::Int(_), ScriptValue::Float(_)) | (ScriptValue::Float(_), ScriptValue::Int(_)) => {
                self.as_f64() == other.as_f64()
            }
            (a, b) => a == b,
        }
    }

    /// Ordering for `<`, `<=`, `>` and `>=`.
    pub fn compare(&self, other: &ScriptValue) -> ShellResult<Ordering> {
        let ordering = match (self, other) {
            (ScriptValue::Int(a), ScriptValue::Int(b)) => Some(a.cmp(b)),
            (ScriptValue::Text(a), ScriptValue::Text(b)) => Some(a.cmp(b)),
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        };
        ordering.ok_or_else(|| {
            ShellError::evaluation(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))
        })
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Null => write!(f, "null"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int(i) => write!(f, "{}", i),
            ScriptValue::Float(x) => write!(f, "{}", x),
            ScriptValue::Text(s) => write!(f, "{}", s),
            ScriptValue::Map(_) => write!(f, "{}", self.to_json()),
            ScriptValue::ResultSet => write!(f, "<result set>"),
        }
    }
}

impl From<&Value> for ScriptValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ScriptValue::Null,
            Value::Integer(i) => ScriptValue::Int(*i),
            Value::Real(f) => ScriptValue::Float(*f),
            Value::Text(s) => ScriptValue::Text(s.clone()),
            Value::Blob(_) => ScriptValue::Text(value.to_string()),
        }
    }
}

impl From<&OptionValue> for ScriptValue {
    fn from(value: &OptionValue) -> Self {
        match value {
            OptionValue::Text(s) => ScriptValue::Text(s.clone()),
            OptionValue::Integer(i) => ScriptValue::Int(*i),
            OptionValue::Flag(b) => ScriptValue::Bool(*b),
            OptionValue::Path(p) => ScriptValue::Text(p.display().to_string()),
            OptionValue::Bindings(map) => ScriptValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::Text(v.clone())))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::Text(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::Text(s)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<Option<u64>> for ScriptValue {
    fn from(n: Option<u64>) -> Self {
        match n.and_then(|n| i64::try_from(n).ok()) {
            Some(n) => ScriptValue::Int(n),
            None => ScriptValue::Null,
        }
    }
}

//! The canonical value model shared by fixtures, expectations, and query results.
//!
//! Every scalar or container that flows through the parser, the data format readers, or the
//! executor is represented as a [`Value`]. Keeping one tagged union means the matcher engine and
//! the diff reporter never need to know where a value originated.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// A normalized, dialect-independent value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Seq(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders a value for diff output and trace logging. Strings are unquoted; everything else
    /// uses its natural textual form.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Time(t) => t.to_rfc3339(),
            Value::Seq(items) => {
                let parts: Vec<String> = items.iter().map(Value::display).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{k}: {}", v.display())).collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, Value::from(v));
                }
                Value::Map(out)
            }
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s,
                        other => yaml_scalar_to_string(&other),
                    };
                    out.insert(key, Value::from(v));
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => format!("{other:?}"),
    }
}

/// Recursively normalizes a value: lossless floats become integers, map keys are always
/// strings (already guaranteed by the `From` impls above), sequences and maps normalize their
/// elements. Idempotent: `normalize(normalize(v)) == normalize(v)`.
pub fn normalize(v: Value) -> Value {
    match v {
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
                Value::Int(f as i64)
            } else {
                Value::Float(f)
            }
        }
        Value::Seq(items) => Value::Seq(items.into_iter().map(normalize).collect()),
        Value::Map(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, normalize(v));
            }
            Value::Map(out)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_lossless_float_to_int() {
        assert_eq!(normalize(Value::Float(4.0)), Value::Int(4));
        assert_eq!(normalize(Value::Float(4.5)), Value::Float(4.5));
    }

    #[test]
    fn normalization_is_idempotent() {
        let v = Value::Seq(vec![Value::Float(2.0), Value::Float(2.5)]);
        let once = normalize(v.clone());
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn json_object_keys_are_always_strings() {
        let json: serde_json::Value = serde_json::json!({"a": 1, "b": [1,2,3]});
        let v = Value::from(json);
        match v {
            Value::Map(m) => {
                assert_eq!(m.get("a"), Some(&Value::Int(1)));
                assert!(matches!(m.get("b"), Some(Value::Seq(_))));
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn display_renders_containers() {
        let v = Value::Seq(vec![Value::Int(1), Value::String("x".into())]);
        assert_eq!(v.display(), "[1, x]");
    }
}

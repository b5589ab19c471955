//! Native value model for data read out of the Janet runtime.
//!
//! Janet numbers are doubles, so every number surfaces as `f64`. Maps are
//! keyed by `Value` because Janet tables accept any non-nil key.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Text the runtime wrote to the process streams during one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Successful result of [`Vm::evaluate`](crate::Vm::evaluate).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Display text of the last form's value
    pub evaluated: String,
    pub output: Output,
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    /// Strings, symbols and keywords (keywords keep their `:` prefix)
    String(String),
    /// Tuples and arrays, order preserved
    Sequence(Vec<Value>),
    /// Tables and structs; iteration order follows the runtime's slot
    /// order and carries no meaning
    Map(IndexMap<Value, Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(&Value::String(key.to_string())),
            _ => None,
        }
    }

    /// Convert into a JSON value. Non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Sequence(items) => items.iter().map(Value::to_json).collect(),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.key_string(), value.to_json()))
                    .collect(),
            ),
        }
    }

    fn key_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// Numbers compare by bit pattern so `Value` can be a map key.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Sequence(items) => items.hash(state),
            // map equality ignores order
            Value::Map(map) => map.len().hash(state),
        }
    }
}

/// Renders like the VM's evaluated text: integral numbers lose the decimal
/// point, sequences are parenthesized and strings are unquoted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Sequence(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key} {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Format a number in `%g` layout with the shortest digits that read
/// back to the same value: plain notation for exponents in `-5..17`,
/// otherwise `1e+20` / `1.5e-07` style.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let abs = n.abs();
    if (1e-4..1e17).contains(&abs) {
        if n == n.trunc() {
            format!("{}", n as i64)
        } else {
            format!("{n}")
        }
    } else {
        exponent_form(n)
    }
}

fn exponent_form(n: f64) -> String {
    let text = format!("{n:e}");
    match text.split_once('e').map(|(m, e)| (m, e.parse::<i32>())) {
        Some((mantissa, Ok(exp))) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        _ => text,
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Nil => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                // JSON objects need string keys
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(&key.key_string(), value)?;
                }
                out.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        )
    }

    #[test]
    fn test_display_numbers() {
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(4.2).to_string(), "4.2");
        assert_eq!(Value::Number(-2.718).to_string(), "-2.718");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::Number(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Value::Number(1e15).to_string(), "1000000000000000");
    }

    #[test]
    fn test_display_number_edges() {
        assert_eq!(Value::Number(1e20).to_string(), "1e+20");
        assert_eq!(Value::Number(-2.5e17).to_string(), "-2.5e+17");
        assert_eq!(Value::Number(1.5e-7).to_string(), "1.5e-07");
        assert_eq!(Value::Number(0.001).to_string(), "0.001");
        assert_eq!(Value::Number(-0.0).to_string(), "-0");
        assert_eq!(Value::Number(0.0).to_string(), "0");
        assert_eq!(Value::Number(f64::NAN).to_string(), "nan");
    }

    #[test]
    fn test_display_nested_sequence() {
        let value = Value::Sequence(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::from(vec![3.0, 4.0]),
            Value::Number(5.0),
        ]);
        assert_eq!(value.to_string(), "(1 2 (3 4) 5)");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::from(":kw").to_string(), ":kw");
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = map(vec![("a", 1.0.into()), ("b", 2.0.into())]);
        let b = map(vec![("b", 2.0.into()), ("a", 1.0.into())]);
        assert_eq!(a, b);
        assert_eq!(a.get("b"), Some(&Value::Number(2.0)));
        assert!(a.get("c").is_none());
    }

    #[test]
    fn test_number_keys() {
        let mut entries = IndexMap::new();
        entries.insert(Value::Number(1.0), Value::from("one"));
        entries.insert(Value::Bool(true), Value::from("yes"));
        let value = Value::Map(entries);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"1": "one", "true": "yes"}));
    }

    #[test]
    fn test_serialize_nested() {
        let value = map(vec![
            ("a", 1.0.into()),
            ("b", map(vec![("c", Value::from(vec!["x", "y"]))])),
            ("d", Value::Nil),
        ]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"a": 1.0, "b": {"c": ["x", "y"]}, "d": null})
        );
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_to_json_non_finite() {
        let value = Value::from(vec![f64::INFINITY, 1.5]);
        assert_eq!(value.to_json(), serde_json::json!([null, 1.5]));
    }
}

//! Runtime values
//!
//! `Value` is a closed tagged union. Operators in the executor pattern-match
//! over it and fault on incompatible operand kinds.

pub mod number;
pub mod record;

pub use number::Decimal;
pub use record::Record;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn int(value: i64) -> Self {
        Value::Number(Decimal::from_i64(value))
    }

    /// Name of the variant, used in fault messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Decimal> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert from JSON. Numbers go through their textual form so that
    /// `0.1` stays exact; exponent forms fall back to the `f64` rendering.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                let text = n.to_string();
                let parsed = Decimal::parse(&text).or_else(|| {
                    n.as_f64()
                        .and_then(|f| Decimal::parse(&format!("{}", f)))
                });
                parsed.map(Value::Number).unwrap_or(Value::Null)
            }
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lossy conversion to `serde_json::Value` (object keys come back sorted).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => {
                let text = n.to_string();
                serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text))
            }
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(r) => JsonValue::Object(
                r.iter().map(|(k, v)| (k.to_string(), v.to_json())).collect(),
            ),
        }
    }

    /// Compact JSON that keeps record field order and exact number text.
    pub fn to_canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical(self, &mut out);
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Text(s) => write_json_string(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Record(record) => {
            out.push('{');
            for (i, (k, v)) in record.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Number(n)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_keeps_field_order() {
        let record: Record = vec![
            ("beta", Value::int(2)),
            ("alpha", Value::int(1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            Value::Record(record).to_canonical_json(),
            r#"{"beta":2,"alpha":1}"#
        );
    }

    #[test]
    fn test_from_json_keeps_decimal_text() {
        let value = Value::from_json(&json!({"price": 0.1, "tags": ["a"], "ok": true}));
        let record = value.as_record().unwrap();
        assert_eq!(record.get("price").unwrap().as_number().unwrap().to_string(), "0.1");
        assert_eq!(record.get("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_record_equality_ignores_order() {
        let a: Record = vec![("x", Value::int(1)), ("y", Value::int(2))].into_iter().collect();
        let b: Record = vec![("y", Value::int(2)), ("x", Value::int(1))].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(Value::text("a\"b\n").to_canonical_json(), r#""a\"b\n""#);
    }
}

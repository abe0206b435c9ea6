//! Wire values and their JSON form

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

use super::Document;

/// Key marking a timestamp in the JSON form
const TIMESTAMP_TAG: &str = "$timestamp";

/// A single field value in a wire document
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Map(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value; doubles only when integral and within `i64` range
    pub fn as_i64(&self) -> Option<i64> {
        // 2^63 is exactly representable; i64::MAX is not
        const LIMIT: f64 = 9_223_372_036_854_775_808.0;
        match self {
            Value::Integer(i) => Some(*i),
            Value::Double(d) if d.fract() == 0.0 && (-LIMIT..LIMIT).contains(d) => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Document> {
        match self {
            Value::Map(doc) => Some(doc),
            _ => None,
        }
    }

    /// Short type name, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Convert to JSON
    ///
    /// Timestamps become `{"$timestamp": "<RFC 3339>"}` so they survive a
    /// round trip. Non-finite doubles become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Integer(i) => json!(i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::Timestamp(ts) => {
                let mut tagged = serde_json::Map::new();
                tagged.insert(
                    TIMESTAMP_TAG.to_string(),
                    json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                );
                serde_json::Value::Object(tagged)
            }
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(doc) => serde_json::Value::Object(
                doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert from JSON
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(ts) = map
                        .get(TIMESTAMP_TAG)
                        .and_then(|v| v.as_str())
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    {
                        return Value::Timestamp(ts.with_timezone(&Utc));
                    }
                }
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Value::String(id.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(doc)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_json_form() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:15:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = Value::Timestamp(ts).to_json();
        assert_eq!(json["$timestamp"], "2024-03-01T10:15:30.123456789Z");
        assert_eq!(Value::from_json(json), Value::Timestamp(ts));
    }

    #[test]
    fn test_object_with_unparseable_timestamp_stays_a_map() {
        let json = json!({ "$timestamp": "yesterday" });
        assert!(matches!(Value::from_json(json), Value::Map(_)));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(Value::from_json(json!(42)), Value::Integer(42));
        assert_eq!(Value::from_json(json!(0.87)), Value::Double(0.87));
        assert_eq!(Value::Double(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::Double(2.0).as_i64(), Some(2));
        assert_eq!(Value::Double(2.5).as_i64(), None);
        assert_eq!(Value::Double(1e300).as_i64(), None);
        assert_eq!(Value::Double(-1e19).as_i64(), None);
        assert_eq!(Value::Double(f64::NAN).as_i64(), None);
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".to_string()));
    }
}

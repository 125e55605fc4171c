//! Tagged value model for document fields
//!
//! Every document field holds a [`Value`]. The variants mirror what the
//! storage layer can represent: SQL scalars, UTC timestamps, arrays, plain
//! JSON objects, and nested documents. Conversion from JSON auto-lifts
//! objects that carry `$id` or `$collection` into child [`Doc`]s so that
//! relationship payloads round-trip as documents.

use crate::Doc;
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Wire format for timestamp values: UTC `YYYY-MM-DD HH:MM:SS.mmm`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A dynamically typed document field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Doc(Doc),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen to f64.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_doc(&self) -> Option<&Doc> {
        match self {
            Value::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    /// Timestamp view. Accepts both native timestamps and strings in the
    /// wire format, since cached documents revive timestamps as strings.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Convert a JSON value, lifting `$id`/`$collection`-bearing objects
    /// (and arrays of them) into nested [`Doc`]s. Objects whose system
    /// fields violate the document invariants stay plain objects.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    // u64 beyond i64::MAX; keep the native representation
                    // as text rather than downcasting.
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let fields: IndexMap<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                match Doc::try_lift(fields) {
                    Ok(doc) => Value::Doc(doc),
                    Err(fields) => Value::Object(fields),
                }
            }
        }
    }

    /// Convert to a JSON value. Timestamps serialize in the wire format.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(format_datetime(*ts)),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Doc(doc) => doc.to_json(),
        }
    }

    /// Deserialize the value into a typed struct via its JSON form.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    /// Total-order comparison used for ordering and cursor boundaries.
    ///
    /// Nulls sort first; mixed numeric kinds compare as floats; everything
    /// else compares only within its own kind and is otherwise equal.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => match (self.as_timestamp(), other.as_timestamp()) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => Ordering::Equal,
                },
            },
        }
    }
}

/// Format a timestamp in the wire format.
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

/// Parse a timestamp from the wire format, tolerating RFC 3339 input.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
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

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Doc> for Value {
    fn from(doc: Doc) -> Self {
        Value::Doc(doc)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
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
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let json = json!({
            "name": "Ada",
            "age": 30,
            "score": 9.5,
            "active": true,
            "tags": ["a", "b"],
            "missing": null,
        });
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_doc_lifting() {
        let value = Value::from_json(json!({"$id": "abc", "name": "Ada"}));
        let doc = value.as_doc().expect("object with $id lifts to a doc");
        assert_eq!(doc.id(), "abc");

        // Arrays lift element-wise.
        let value = Value::from_json(json!([{"$id": "a"}, {"$id": "b"}]));
        let items = value.as_array().unwrap();
        assert!(items.iter().all(|v| v.as_doc().is_some()));

        // Plain objects stay objects.
        let value = Value::from_json(json!({"set": ["x"]}));
        assert!(value.as_object().is_some());

        // A non-string $id disqualifies lifting.
        let value = Value::from_json(json!({"$id": 42}));
        assert!(value.as_object().is_some());
    }

    #[test]
    fn test_datetime_wire_format() {
        let ts = parse_datetime("2024-03-01 12:30:45.123").expect("wire format parses");
        assert_eq!(format_datetime(ts), "2024-03-01 12:30:45.123");

        // RFC 3339 input is tolerated on the way in.
        assert!(parse_datetime("2024-03-01T12:30:45.123Z").is_some());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_compare_mixed_numerics() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Ordering::Less
        );
        assert_eq!(Value::Null.compare(&Value::Integer(0)), Ordering::Less);
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_huge_integers_not_downcast() {
        let json = json!(u64::MAX);
        let value = Value::from_json(json);
        assert_eq!(value.as_str(), Some("18446744073709551615"));
    }
}

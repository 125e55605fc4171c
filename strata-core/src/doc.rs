//! Ordered document entity
//!
//! A [`Doc`] is an insertion-ordered mapping from field name to [`Value`]
//! with typed accessors for the reserved system fields. It is the unit the
//! engine validates, filters, authorizes, persists, and caches.

use crate::{StrataError, StrataResult, Value};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered mapping from field name to value, plus system fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Doc {
    fields: IndexMap<String, Value>,
}

impl Doc {
    /// Reserved system field: unique string id within the collection.
    pub const ID: &'static str = "$id";
    /// Reserved system field: storage-assigned monotonic integer.
    pub const SEQUENCE: &'static str = "$sequence";
    /// Reserved system field: owning collection id.
    pub const COLLECTION: &'static str = "$collection";
    /// Reserved system field: tenant id in shared-table mode.
    pub const TENANT: &'static str = "$tenant";
    /// Reserved system field: creation timestamp.
    pub const CREATED_AT: &'static str = "$createdAt";
    /// Reserved system field: last-write timestamp.
    pub const UPDATED_AT: &'static str = "$updatedAt";
    /// Reserved system field: list of permission strings.
    pub const PERMISSIONS: &'static str = "$permissions";

    /// All reserved system field names.
    pub const SYSTEM_FIELDS: [&'static str; 7] = [
        Self::ID,
        Self::SEQUENCE,
        Self::COLLECTION,
        Self::TENANT,
        Self::CREATED_AT,
        Self::UPDATED_AT,
        Self::PERMISSIONS,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a JSON object, enforcing the system-field
    /// invariants: `$id` must be a string and `$permissions` a list.
    pub fn from_json(json: serde_json::Value) -> StrataResult<Doc> {
        let serde_json::Value::Object(map) = json else {
            return Err(StrataError::validation("Document must be a JSON object"));
        };
        let fields: IndexMap<String, Value> = map
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect();
        Self::from_fields(fields)
    }

    /// Build a document from already-converted values, enforcing the
    /// system-field invariants.
    pub fn from_fields(fields: IndexMap<String, Value>) -> StrataResult<Doc> {
        if let Some(id) = fields.get(Self::ID) {
            if !matches!(id, Value::String(_)) {
                return Err(StrataError::validation("$id must be a string"));
            }
        }
        if let Some(permissions) = fields.get(Self::PERMISSIONS) {
            if !matches!(permissions, Value::Array(_)) {
                return Err(StrataError::validation("$permissions must be a list"));
            }
        }
        Ok(Doc { fields })
    }

    /// Lift a field map into a document when it looks like one. Used by
    /// [`Value::from_json`]: an object qualifies when it carries `$id` or
    /// `$collection` and none of the system-field invariants is violated.
    /// On disqualification the fields are handed back unchanged.
    pub(crate) fn try_lift(
        fields: IndexMap<String, Value>,
    ) -> Result<Doc, IndexMap<String, Value>> {
        let has_marker = fields.contains_key(Self::ID) || fields.contains_key(Self::COLLECTION);
        if !has_marker {
            return Err(fields);
        }
        match Self::from_fields(fields.clone()) {
            Ok(doc) => Ok(doc),
            Err(_) => Err(fields),
        }
    }

    // ========================================================================
    // FIELD ACCESS
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a field, falling back to a default when absent or null.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a Value) -> &'a Value {
        match self.fields.get(name) {
            Some(Value::Null) | None => default,
            Some(value) => value,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_integer)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_array(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_array)
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field only when a value is actually supplied.
    pub fn update(&mut self, name: impl Into<String>, value: Option<Value>) -> &mut Self {
        if let Some(value) = value {
            self.fields.insert(name.into(), value);
        }
        self
    }

    /// Append to an array field. Fails unless the field is absent or holds
    /// an array.
    pub fn append(&mut self, name: &str, value: impl Into<Value>) -> StrataResult<&mut Self> {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value.into()),
            _ => {
                return Err(StrataError::validation(format!(
                    "Cannot append to non-array field '{}'",
                    name
                )))
            }
        }
        Ok(self)
    }

    /// Prepend to an array field. Fails unless the field is absent or holds
    /// an array.
    pub fn prepend(&mut self, name: &str, value: impl Into<Value>) -> StrataResult<&mut Self> {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.insert(0, value.into()),
            _ => {
                return Err(StrataError::validation(format!(
                    "Cannot prepend to non-array field '{}'",
                    name
                )))
            }
        }
        Ok(self)
    }

    /// Remove a field, returning its value when present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // ========================================================================
    // PREDICATE-DRIVEN ACCESS
    // ========================================================================

    /// Find the first field whose value satisfies the predicate.
    pub fn find_where<P>(&self, predicate: P) -> Option<(&str, &Value)>
    where
        P: Fn(&str, &Value) -> bool,
    {
        self.fields
            .iter()
            .find(|(k, v)| predicate(k, v))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Replace every field value that satisfies the predicate.
    pub fn replace_where<P, F>(&mut self, predicate: P, replace: F) -> usize
    where
        P: Fn(&str, &Value) -> bool,
        F: Fn(&Value) -> Value,
    {
        let mut replaced = 0;
        for (key, value) in self.fields.iter_mut() {
            if predicate(key, value) {
                *value = replace(value);
                replaced += 1;
            }
        }
        replaced
    }

    /// Delete every field that satisfies the predicate.
    pub fn delete_where<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&str, &Value) -> bool,
    {
        let before = self.fields.len();
        self.fields.retain(|k, v| !predicate(k, v));
        before - self.fields.len()
    }

    // ========================================================================
    // SYSTEM FIELD ACCESSORS
    // ========================================================================

    /// Document id, empty when unset.
    pub fn id(&self) -> &str {
        self.get_str(Self::ID).unwrap_or("")
    }

    /// Storage-assigned sequence, zero when unset.
    pub fn sequence(&self) -> i64 {
        self.get_integer(Self::SEQUENCE).unwrap_or(0)
    }

    /// Owning collection id, empty when unset.
    pub fn collection(&self) -> &str {
        self.get_str(Self::COLLECTION).unwrap_or("")
    }

    pub fn tenant(&self) -> Option<i64> {
        self.get_integer(Self::TENANT)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get(Self::CREATED_AT).and_then(Value::as_timestamp)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.get(Self::UPDATED_AT).and_then(Value::as_timestamp)
    }

    /// Permission strings attached to this document.
    pub fn permissions(&self) -> Vec<String> {
        self.get_array(Self::PERMISSIONS)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // CONVERSION
    // ========================================================================

    /// Shallow-filtered deep copy. `allow` keeps only the named fields when
    /// non-empty; `disallow` drops the named fields afterwards.
    pub fn to_object(&self, allow: &[&str], disallow: &[&str]) -> Doc {
        let fields = self
            .fields
            .iter()
            .filter(|(k, _)| allow.is_empty() || allow.contains(&k.as_str()))
            .filter(|(k, _)| !disallow.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Doc { fields }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Doc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Doc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Doc::from_json(json).map_err(serde::de::Error::custom)
    }
}

impl FromIterator<(String, Value)> for Doc {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Doc {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Doc {
        Doc::from_json(json!({
            "$id": "doc1",
            "$permissions": ["read(\"any\")"],
            "name": "Ada",
            "age": 30,
            "tags": ["x"],
        }))
        .unwrap()
    }

    #[test]
    fn test_invariants() {
        assert!(Doc::from_json(json!({"$id": 42})).is_err());
        assert!(Doc::from_json(json!({"$permissions": "read"})).is_err());
        assert!(Doc::from_json(json!("not an object")).is_err());
        assert!(Doc::from_json(json!({"$id": "ok", "$permissions": []})).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let doc = sample();
        let round = Doc::from_json(doc.to_json()).unwrap();
        assert_eq!(doc, round);
        assert_eq!(doc.to_json(), round.to_json());
    }

    #[test]
    fn test_append_prepend() {
        let mut doc = sample();
        doc.append("tags", "y").unwrap();
        doc.prepend("tags", "w").unwrap();
        assert_eq!(
            doc.get("tags").unwrap().to_json(),
            json!(["w", "x", "y"])
        );

        // Absent field starts a fresh array.
        doc.append("labels", "a").unwrap();
        assert_eq!(doc.get("labels").unwrap().to_json(), json!(["a"]));

        // Scalar fields reject list mutation.
        assert!(doc.append("name", "x").is_err());
        assert!(doc.prepend("age", 1).is_err());
    }

    #[test]
    fn test_update_is_noop_without_value() {
        let mut doc = sample();
        doc.update("name", None);
        assert_eq!(doc.get_str("name"), Some("Ada"));
        doc.update("name", Some(Value::from("Grace")));
        assert_eq!(doc.get_str("name"), Some("Grace"));
    }

    #[test]
    fn test_predicates() {
        let mut doc = sample();
        let found = doc.find_where(|_, v| v.as_integer() == Some(30));
        assert_eq!(found.map(|(k, _)| k), Some("age"));

        doc.replace_where(|k, _| k == "age", |_| Value::Integer(31));
        assert_eq!(doc.get_integer("age"), Some(31));

        let deleted = doc.delete_where(|k, _| k.starts_with('$'));
        assert_eq!(deleted, 2);
        assert!(!doc.has(Doc::ID));
    }

    #[test]
    fn test_to_object_filtering() {
        let doc = sample();
        let only = doc.to_object(&["name", "age"], &[]);
        assert_eq!(only.keys().collect::<Vec<_>>(), vec!["name", "age"]);

        let without = doc.to_object(&[], &["$permissions"]);
        assert!(!without.has(Doc::PERMISSIONS));
        assert!(without.has("name"));
    }

    #[test]
    fn test_system_accessors() {
        let doc = Doc::from_json(json!({
            "$id": "d",
            "$sequence": 7,
            "$collection": "users",
            "$tenant": 3,
            "$createdAt": "2024-01-02 03:04:05.006",
        }))
        .unwrap();
        assert_eq!(doc.id(), "d");
        assert_eq!(doc.sequence(), 7);
        assert_eq!(doc.collection(), "users");
        assert_eq!(doc.tenant(), Some(3));
        assert!(doc.created_at().is_some());
        assert!(doc.updated_at().is_none());
    }
}

//! Filter expressions passed to the storage layer
//!
//! A [`Filter`] is a JSON object in the MongoDB query dialect. Keys are field
//! names (or `$and` / `$or`), values are either literals or operator maps such
//! as `{"$gte": 5}`. Identifiers and timestamps use extended JSON:
//! `{"$oid": "<hex>"}` and `{"$date": "<rfc3339>"}`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::object_id::{OID_KEY, ObjectId};

/// Extended JSON key used for timestamps inside filters
pub const DATE_KEY: &str = "$date";

/// Name of the identity field in stored documents
pub const ID_FIELD: &str = "_id";

/// A stored document
pub type Document = Map<String, Value>;

/// Comparison operators understood by the translator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    pub fn operator(self) -> &'static str {
        match self {
            Comparison::Lt => "$lt",
            Comparison::Lte => "$lte",
            Comparison::Gt => "$gt",
            Comparison::Gte => "$gte",
        }
    }
}

/// Structured query constraints for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Filter selecting a single document by identity
    pub fn by_id(id: &ObjectId) -> Self {
        let mut filter = Self::new();
        filter.insert(ID_FIELD, id.to_extended_json());
        filter
    }

    /// Build from a decoded JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Set (or replace) the constraint for a field
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Add an operator constraint, merging with operators already present
    /// on the same field. A literal equality already set is replaced.
    pub fn add_operator(&mut self, field: &str, operator: &str, operand: Value) {
        let entry = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        match entry {
            Value::Object(ops) if is_operator_map(ops) || ops.is_empty() => {
                ops.insert(operator.to_string(), operand);
            }
            other => {
                *other = json!({ operator: operand });
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Whether every key of an object is an operator (`$`-prefixed) and the
/// object is not an extended JSON literal
pub fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && !is_extended_literal(map) && map.keys().all(|k| k.starts_with('$'))
}

/// Whether an object is an extended JSON literal (`$oid` or `$date`)
pub fn is_extended_literal(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key(OID_KEY) || map.contains_key(DATE_KEY))
}

/// Extended JSON form for a timestamp
pub fn date_value(at: &DateTime<Utc>) -> Value {
    json!({ DATE_KEY: at.to_rfc3339_opts(SecondsFormat::Millis, true) })
}

/// Read a timestamp from `{"$date": ...}` (RFC 3339 string or epoch millis)
pub fn date_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Object(map) = value else {
        return None;
    };
    match map.get(DATE_KEY)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_by_id_uses_extended_json() {
        let id = ObjectId::parse_str("540e05189b2212ee6b1f44d3").unwrap();
        let filter = Filter::by_id(&id);
        assert_eq!(
            filter.into_value(),
            json!({"_id": {"$oid": "540e05189b2212ee6b1f44d3"}})
        );
    }

    #[test]
    fn test_add_operator_merges_on_same_field() {
        let mut filter = Filter::new();
        filter.add_operator("age", "$gte", json!(5));
        filter.add_operator("age", "$lt", json!(10));
        assert_eq!(
            filter.into_value(),
            json!({"age": {"$gte": 5, "$lt": 10}})
        );
    }

    #[test]
    fn test_add_operator_replaces_literal() {
        let mut filter = Filter::new();
        filter.insert("age", json!(3));
        filter.add_operator("age", "$gt", json!(1));
        assert_eq!(filter.get("age"), Some(&json!({"$gt": 1})));
    }

    #[test]
    fn test_add_operator_does_not_merge_into_oid_literal() {
        let mut filter = Filter::new();
        filter.insert("ref", ObjectId::new().to_extended_json());
        filter.add_operator("ref", "$exists", json!(true));
        assert_eq!(filter.get("ref"), Some(&json!({"$exists": true})));
    }

    #[test]
    fn test_date_roundtrip() {
        let at = Utc.timestamp_opt(12345, 0).unwrap();
        let value = date_value(&at);
        assert_eq!(value, json!({"$date": "1970-01-01T03:25:45.000Z"}));
        assert_eq!(date_from_value(&value), Some(at));
        assert_eq!(date_from_value(&json!({"$date": 12345000})), Some(at));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Filter::from_value(json!([1, 2])).is_none());
        assert!(Filter::from_value(json!({"a": 1})).is_some());
    }
}

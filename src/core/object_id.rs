//! Object identifiers for stored documents
//!
//! An [`ObjectId`] is 12 bytes: a 4-byte big-endian Unix timestamp, 5 random
//! bytes and a 3-byte counter. On the wire it is a 24 character lowercase hex
//! string; inside filter expressions it is written as `{"$oid": "<hex>"}`.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// Extended JSON key used for identifiers inside filters
pub const OID_KEY: &str = "$oid";

/// Errors produced when parsing an identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectIdError {
    #[error("object id must be 24 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("object id is not valid hex: {0}")]
    InvalidHex(String),
}

/// A 12-byte document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let random = Uuid::new_v4();
        let mut bytes = [0u8; 5];
        bytes.copy_from_slice(&random.as_bytes()[..5]);
        bytes
    })
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| {
        let seed = Uuid::new_v4();
        let b = seed.as_bytes();
        AtomicU32::new(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    });
    counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF
}

impl ObjectId {
    /// Generate a fresh identifier stamped with the current time
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp() as u32;
        let counter = next_counter();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Build an identifier from raw bytes
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Parse a 24 character hex string
    pub fn parse_str(s: &str) -> Result<Self, ObjectIdError> {
        if s.len() != 24 {
            return Err(ObjectIdError::InvalidLength(s.len()));
        }
        let decoded = hex::decode(s).map_err(|e| ObjectIdError::InvalidHex(e.to_string()))?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Whether a string has the shape of an identifier
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creation time embedded in the identifier
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(seconds), 0)
            .single()
            .unwrap_or_default()
    }

    /// Extended JSON form used inside filter expressions
    pub fn to_extended_json(&self) -> Value {
        json!({ OID_KEY: self.to_hex() })
    }

    /// Read an identifier from either a hex string or `{"$oid": "<hex>"}`
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse_str(s).ok(),
            Value::Object(map) if map.len() == 1 => map
                .get(OID_KEY)
                .and_then(Value::as_str)
                .and_then(|s| Self::parse_str(s).ok()),
            _ => None,
        }
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObjectIdVisitor;

        impl<'de> Visitor<'de> for ObjectIdVisitor {
            type Value = ObjectId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 24 character hex string or {\"$oid\": \"...\"}")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ObjectId, E> {
                ObjectId::parse_str(v).map_err(E::custom)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ObjectId, A::Error> {
                let mut found = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key == OID_KEY {
                        let hex: String = map.next_value()?;
                        found = Some(ObjectId::parse_str(&hex).map_err(de::Error::custom)?);
                    } else {
                        map.next_value::<de::IgnoredAny>()?;
                    }
                }
                found.ok_or_else(|| de::Error::missing_field(OID_KEY))
            }
        }

        deserializer.deserialize_any(ObjectIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_and_valid() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert!(ObjectId::is_valid(&a.to_hex()));
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ObjectId::parse_str("540e05189b2212ee6b1f44d3").unwrap();
        assert_eq!(id.to_string(), "540e05189b2212ee6b1f44d3");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            ObjectId::parse_str("abc"),
            Err(ObjectIdError::InvalidLength(3))
        );
        assert!(matches!(
            ObjectId::parse_str("zz0e05189b2212ee6b1f44d3"),
            Err(ObjectIdError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_timestamp_is_embedded() {
        let before = Utc::now().timestamp();
        let id = ObjectId::new();
        assert!(id.timestamp().timestamp() >= before - 1);
    }

    #[test]
    fn test_deserialize_hex_and_extended_json() {
        let hex = "540e05189b2212ee6b1f44d3";
        let plain: ObjectId = serde_json::from_value(json!(hex)).unwrap();
        let extended: ObjectId = serde_json::from_value(json!({ "$oid": hex })).unwrap();
        assert_eq!(plain, extended);
        assert_eq!(serde_json::to_value(plain).unwrap(), json!(hex));
    }

    #[test]
    fn test_from_json() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::from_json(&id.to_extended_json()), Some(id));
        assert_eq!(ObjectId::from_json(&json!(12345)), None);
    }
}

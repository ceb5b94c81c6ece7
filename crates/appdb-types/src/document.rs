use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::key::DocumentKey;

/// The value of a document: an ordered mapping from field names to JSON.
pub type Fields = Map<String, Value>;

/// A persisted record.
///
/// Serializes as the flat item shape clients already consume:
/// `{"walletID", "app", "model", "key", "value", "created_at", "updated_at"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub key: DocumentKey,
    pub value: Fields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A deletion marker for `key`: same key, empty value.
    ///
    /// Tombstones never reach a storage backend; they only travel on the
    /// change bus.
    pub fn tombstone(key: DocumentKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            value: Fields::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if this document carries no fields.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Convert an arbitrary JSON value into document fields.
///
/// Only objects are accepted; a document value is never a bare scalar or
/// sequence.
pub fn fields_from_value(value: Value) -> Result<Fields, TypeError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(TypeError::NotAnObject { found: "null" }),
        Value::Bool(_) => Err(TypeError::NotAnObject { found: "boolean" }),
        Value::Number(_) => Err(TypeError::NotAnObject { found: "number" }),
        Value::String(_) => Err(TypeError::NotAnObject { found: "string" }),
        Value::Array(_) => Err(TypeError::NotAnObject { found: "array" }),
    }
}

/// Shallow, field-level merge: every field in `partial` overwrites the field
/// of the same name in `base`; fields absent from `partial` are untouched.
pub fn merge_fields(mut base: Fields, partial: Fields) -> Fields {
    for (name, value) in partial {
        base.insert(name, value);
    }
    base
}

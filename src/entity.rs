//! Entity keys and the record ↔ field-list codec.
//!
//! Stores index every field unless told otherwise, and reject or mangle
//! indexed values past a size ceiling. [`encode`] tags those fields so the
//! store leaves them out of its indexes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A flat record: field name to value.
pub type Record = serde_json::Map<String, Value>;

/// Identity of a stored entity. Never changes across updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub namespace: String,
    pub kind: String,
    pub id: Uuid,
}

impl EntityKey {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: Uuid) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id,
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// One field in the store's representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: Value,
    pub exclude_from_indexes: bool,
}

/// A keyed field list, ready to save.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: EntityKey,
    pub fields: Vec<Field>,
}

impl Entity {
    pub fn new(key: EntityKey, record: &Record, max_index_length: usize) -> Self {
        Self {
            key,
            fields: encode(record, max_index_length),
        }
    }

    pub fn record(&self) -> Record {
        decode(&self.fields)
    }

    /// Value of `name` if it exists and is indexed.
    pub fn indexed(&self, name: &str) -> Option<&Value> {
        indexed_value(&self.fields, name)
    }
}

/// Record → field list. Fields whose length reaches `max_index_length` are
/// excluded from indexes.
pub fn encode(record: &Record, max_index_length: usize) -> Vec<Field> {
    record
        .iter()
        .map(|(name, value)| Field {
            name: name.clone(),
            value: value.clone(),
            exclude_from_indexes: indexed_length(value)
                .is_some_and(|len| len >= max_index_length),
        })
        .collect()
}

/// Field list → record.
pub fn decode(fields: &[Field]) -> Record {
    fields
        .iter()
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect()
}

pub(crate) fn indexed_value<'a>(fields: &'a [Field], name: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|f| f.name == name && !f.exclude_from_indexes)
        .map(|f| &f.value)
}

// Scalars other than strings have no meaningful length.
fn indexed_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.len()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string().len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn long_fields_are_excluded_from_indexes() {
        let rec = record(json!({
            "name": "short",
            "data": "x".repeat(10),
            "blob": ["a", "b", "c"],
            "count": 123456789,
        }));
        let fields = encode(&rec, 10);
        let mut excluded: Vec<_> = fields
            .iter()
            .filter(|f| f.exclude_from_indexes)
            .map(|f| f.name.as_str())
            .collect();
        excluded.sort();
        assert_eq!(excluded, ["blob", "data"]);
    }

    #[test]
    fn decode_restores_record() {
        let rec = record(json!({"status": "open", "data": "y".repeat(50)}));
        assert_eq!(decode(&encode(&rec, 5)), rec);
    }

    #[test]
    fn unindexed_fields_are_invisible_to_lookups() {
        let rec = record(json!({"status": "open", "data": "zzzzzz"}));
        let entity = Entity::new(EntityKey::new("ns", "Job", Uuid::new_v4()), &rec, 6);
        assert_eq!(entity.indexed("status"), Some(&json!("open")));
        assert_eq!(entity.indexed("data"), None);
        assert_eq!(entity.indexed("missing"), None);
    }
}

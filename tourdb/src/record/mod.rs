// Schema-less records: a field map over serde_json values

use crate::util;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding a record's identity within its collection.
pub const ID_FIELD: &str = "id";

/// A single schema-less record. Field presence and type are checked at the
/// point of use; nothing is assumed about the field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Record(Map::new())
    }

    /// Wrap a JSON value. Only objects are records.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Record(map)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD).filter(|v| !v.is_null())
    }

    /// The id rendered as a string, for display and synthetic ids.
    pub fn id_string(&self) -> Option<String> {
        self.id().and_then(util::scalar_string)
    }

    /// Whether this record answers to a textual id such as a URL segment.
    /// String ids match verbatim, numeric ids by their decimal rendering.
    pub fn has_id(&self, id: &str) -> bool {
        match self.id() {
            Some(Value::String(s)) => s == id,
            Some(Value::Number(n)) => n.to_string() == id,
            _ => false,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// A field that is present and not null.
    pub fn defined(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Numeric value of a field; missing or non-numeric reads as zero.
    pub fn number_or_zero(&self, field: &str) -> f64 {
        self.0.get(field).and_then(util::as_number).unwrap_or(0.0)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge a patch into this record. Null patch values leave the stored
    /// value untouched.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if !value.is_null() {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

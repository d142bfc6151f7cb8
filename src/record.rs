//! Records
//!
//! A record is a JSON object with a mandatory string `id`. All other fields
//! are kept as-is, so unknown fields survive a reconcile/persist cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the record identity
pub const ID_FIELD: &str = "id";

/// Fields attached by the legacy in-memory engine; never written back
pub const STORAGE_INTERNAL_FIELDS: [&str; 2] = ["$loki", "meta"];

/// One stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a JSON object, overriding whatever `id` it carried
    pub fn from_object(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        let mut record = Record {
            id: id.into(),
            fields,
        };
        record.strip_internal();
        record
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_FIELD {
            return None;
        }
        self.fields.get(field)
    }

    /// Set a field. The id is immutable and cannot be set through here.
    pub fn set(&mut self, field: &str, value: Value) {
        debug_assert!(field != ID_FIELD, "id is immutable");
        if field != ID_FIELD {
            self.fields.insert(field.to_string(), value);
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Remove fields that belong to the storage engine rather than the document
    pub fn strip_internal(&mut self) {
        for field in STORAGE_INTERNAL_FIELDS {
            self.fields.remove(field);
        }
    }

    /// Render as a plain JSON value
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(object)
    }
}

/// JavaScript-style truthiness of a JSON value.
///
/// `null`, `false`, `0` and `""` are falsy; everything else, including empty
/// arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

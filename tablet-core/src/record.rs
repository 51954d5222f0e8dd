//! Records: the flat data units tables store and return.

use crate::{RecordId, Timestamp};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flat, table-persisted value keyed by its id.
///
/// # Implementation Requirements
///
/// - `id()` must be stable for the lifetime of the value
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
///   so any backend can store them
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The unique identifier of this record.
    fn id(&self) -> &RecordId;
}

/// Schemaless record with the conventional `_id` / `createdAt` /
/// `lastUpdate` envelope and arbitrary extra fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: RecordId,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(rename = "lastUpdate", default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Timestamp>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document stamped with the current time.
    pub fn new(id: RecordId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: Some(now),
            last_update: Some(now),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field and bump `lastUpdate`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.touch();
        self.fields.insert(key.into(), value.into())
    }

    /// Bump `lastUpdate` to now.
    pub fn touch(&mut self) {
        self.last_update = Some(Utc::now());
    }
}

impl Record for Document {
    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_wire_shape() {
        let doc = Document {
            id: RecordId::new("w1").unwrap(),
            created_at: None,
            last_update: None,
            fields: Map::new(),
        }
        .with_field("name", "sprocket")
        .with_field("size", 3);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"_id": "w1", "name": "sprocket", "size": 3}));
    }

    #[test]
    fn test_document_round_trips_extra_fields() {
        let raw = json!({
            "_id": "w2",
            "createdAt": "2024-01-01T00:00:00Z",
            "color": "red"
        });
        let doc: Document = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.id().as_str(), "w2");
        assert!(doc.created_at.is_some());
        assert!(doc.last_update.is_none());
        assert_eq!(doc.get("color"), Some(&json!("red")));
    }

    #[test]
    fn test_document_without_id_is_rejected() {
        let result: Result<Document, _> = serde_json::from_value(json!({"name": "x"}));
        assert!(result.is_err());

        let result: Result<Document, _> = serde_json::from_value(json!({"_id": ""}));
        assert!(result.is_err());
    }

    #[test]
    fn test_set_bumps_last_update() {
        let mut doc = Document::new(RecordId::new("w3").unwrap());
        let before = doc.last_update;
        std::thread::sleep(std::time::Duration::from_millis(2));
        doc.set("name", "gear");
        assert!(doc.last_update > before);
        assert_eq!(doc.get("name"), Some(&json!("gear")));
    }
}

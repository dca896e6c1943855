//! Catalog records and search documents.
//!
//! A [`CatalogRecord`] is whatever the system of record holds for one id.
//! A [`Document`] is the projection of a record onto the index mapping,
//! ready for a bulk write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DocIndexError;

/// One row of the catalog.
///
/// Serialized as a flat JSON object: `{"id": "...", "title": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Stable catalog identifier, reused as the document id
    pub id: String,

    /// Remaining attributes
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CatalogRecord {
    /// Create an empty record with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocIndexError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocIndexError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse one line of a JSON Lines import file.
    pub fn from_json_line(line: &str) -> Result<Self, DocIndexError> {
        let record: Self = serde_json::from_str(line)?;
        if record.id.trim().is_empty() {
            return Err(DocIndexError::InvalidInput(
                "record id must not be empty".to_string(),
            ));
        }
        Ok(record)
    }
}

/// A document addressed to one index generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id (the catalog record id)
    pub id: String,

    /// Mapped fields
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

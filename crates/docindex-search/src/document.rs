//! Conversion from catalog records to index documents.
//!
//! Records are projected onto the mapped fields; attributes the mapping does
//! not know are dropped, and values whose JSON type contradicts the mapping
//! make the whole record invalid.

use serde_json::{Map, Value};
use tantivy::TantivyDocument;

use docindex_types::{CatalogRecord, Document};

use crate::config::{FieldMapping, IndexConfig};
use crate::error::SearchError;
use crate::schema::IndexSchema;

/// Project a catalog record onto the index mapping.
pub fn record_to_document(
    record: &CatalogRecord,
    config: &IndexConfig,
) -> Result<Document, SearchError> {
    if record.id.trim().is_empty() {
        return Err(SearchError::InvalidDocument {
            id: record.id.clone(),
            reason: "empty id".to_string(),
        });
    }

    let mut body = Map::new();
    for (name, mapping) in &config.mappings {
        let Some(value) = record.fields.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        check_value(mapping, value).map_err(|reason| SearchError::InvalidDocument {
            id: record.id.clone(),
            reason: format!("field {}: {}", name, reason),
        })?;
        body.insert(name.clone(), value.clone());
    }

    Ok(Document::new(record.id.clone(), body))
}

/// Check every body field of a document against the mapping.
///
/// Unmapped fields are rejected here, unlike in [`record_to_document`]:
/// an engine must not silently widen a generation's schema.
pub fn validate_document(doc: &Document, config: &IndexConfig) -> Result<(), String> {
    for (name, value) in &doc.body {
        let mapping = config
            .mappings
            .get(name)
            .ok_or_else(|| format!("field {} is not mapped", name))?;
        if !value.is_null() {
            check_value(mapping, value).map_err(|reason| format!("field {}: {}", name, reason))?;
        }
    }
    Ok(())
}

/// Accept a scalar of the mapped type, or an array of them.
fn check_value(mapping: &FieldMapping, value: &Value) -> Result<(), String> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|item| check_scalar(mapping, item)),
        scalar => check_scalar(mapping, scalar),
    }
}

fn check_scalar(mapping: &FieldMapping, value: &Value) -> Result<(), String> {
    let ok = match mapping {
        FieldMapping::Text { .. } | FieldMapping::Keyword => value.is_string(),
        FieldMapping::Integer => value.is_i64(),
        FieldMapping::Float => value.is_number(),
        FieldMapping::Boolean => value.is_boolean(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("expected {}, got {}", mapping.type_name(), value))
    }
}

/// Build the Tantivy document for a validated [`Document`].
pub fn to_tantivy_doc(schema: &IndexSchema, doc: &Document) -> Result<TantivyDocument, String> {
    let mut out = TantivyDocument::new();
    out.add_text(schema.doc_id, &doc.id);

    for (name, value) in &doc.body {
        let (field, mapping) = schema
            .field(name)
            .ok_or_else(|| format!("field {} is not mapped", name))?;
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            scalar => vec![scalar],
        };
        for value in values {
            match (mapping, value) {
                (FieldMapping::Text { .. } | FieldMapping::Keyword, Value::String(s)) => {
                    out.add_text(*field, s)
                }
                (FieldMapping::Integer, v) if v.is_i64() => {
                    out.add_i64(*field, v.as_i64().unwrap_or_default())
                }
                (FieldMapping::Float, Value::Number(n)) => {
                    out.add_f64(*field, n.as_f64().unwrap_or_default())
                }
                (FieldMapping::Boolean, Value::Bool(b)) => out.add_bool(*field, *b),
                (mapping, other) => {
                    return Err(format!(
                        "field {}: expected {}, got {}",
                        name,
                        mapping.type_name(),
                        other
                    ))
                }
            }
        }
    }

    Ok(out)
}

//! Index configuration: field mappings plus text analysis.
//!
//! A configuration is applied once, when a generation is created. Changing
//! it means building a new generation; the engine decides whether a change
//! can be applied to a live index in place (see `update-settings`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Bumped whenever [`catalog_index_config`] changes.
pub const CONFIG_VERSION: u32 = 3;

/// Field reserved for the document id in every generation.
pub const ID_FIELD: &str = "doc_id";

/// Analyzers every engine provides without an analysis entry.
pub const BUILTIN_ANALYZERS: &[&str] = &["default", "raw", "whitespace", "en_stem"];

/// How one document field is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldMapping {
    /// Full-text field run through the named analyzer
    Text { analyzer: String },
    /// Exact-match string
    Keyword,
    /// Signed 64-bit integer
    Integer,
    /// 64-bit float
    Float,
    Boolean,
}

impl FieldMapping {
    pub fn text(analyzer: impl Into<String>) -> Self {
        FieldMapping::Text {
            analyzer: analyzer.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldMapping::Text { .. } => "text",
            FieldMapping::Keyword => "keyword",
            FieldMapping::Integer => "integer",
            FieldMapping::Float => "float",
            FieldMapping::Boolean => "boolean",
        }
    }
}

/// A named analyzer: one tokenizer followed by token filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerDef {
    pub tokenizer: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl AnalyzerDef {
    pub fn new(tokenizer: impl Into<String>, filters: &[&str]) -> Self {
        Self {
            tokenizer: tokenizer.into(),
            filters: filters.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Custom analyzers declared by a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub analyzers: BTreeMap<String, AnalyzerDef>,
}

/// Complete configuration for one index generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub version: u32,
    pub mappings: BTreeMap<String, FieldMapping>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl IndexConfig {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            mappings: BTreeMap::new(),
            analysis: AnalysisConfig::default(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.mappings.insert(name.into(), mapping);
        self
    }

    pub fn with_analyzer(mut self, name: impl Into<String>, def: AnalyzerDef) -> Self {
        self.analysis.analyzers.insert(name.into(), def);
        self
    }

    /// Check internal consistency: reserved names, analyzer references.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.mappings.is_empty() {
            return Err(SearchError::InvalidConfig(
                "at least one field mapping is required".to_string(),
            ));
        }
        for (name, mapping) in &self.mappings {
            if name == ID_FIELD {
                return Err(SearchError::InvalidConfig(format!(
                    "field name {} is reserved",
                    ID_FIELD
                )));
            }
            if name.is_empty() || name.starts_with('-') {
                return Err(SearchError::InvalidConfig(format!(
                    "invalid field name {:?}",
                    name
                )));
            }
            if let FieldMapping::Text { analyzer } = mapping {
                let known = BUILTIN_ANALYZERS.contains(&analyzer.as_str())
                    || self.analysis.analyzers.contains_key(analyzer);
                if !known {
                    return Err(SearchError::InvalidConfig(format!(
                        "field {} uses undefined analyzer {}",
                        name, analyzer
                    )));
                }
            }
        }
        for (name, def) in &self.analysis.analyzers {
            if BUILTIN_ANALYZERS.contains(&name.as_str()) {
                return Err(SearchError::InvalidConfig(format!(
                    "analyzer name {} shadows a builtin analyzer",
                    name
                )));
            }
            if def.tokenizer.is_empty() {
                return Err(SearchError::InvalidConfig(format!(
                    "analyzer {} has no tokenizer",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Analysis components the engine must provide, as `tokenizer:<name>` /
    /// `filter:<name>` capability strings.
    pub fn required_components(&self) -> BTreeSet<String> {
        let mut required = BTreeSet::new();
        for def in self.analysis.analyzers.values() {
            required.insert(tokenizer_capability(&def.tokenizer));
            for filter in &def.filters {
                required.insert(filter_capability(filter));
            }
        }
        required
    }

    /// Describe why `other` cannot be applied over `self` without a rebuild,
    /// treating added fields and added analyzers as compatible.
    pub fn additive_conflict(&self, other: &IndexConfig) -> Option<String> {
        for (name, mapping) in &self.mappings {
            match other.mappings.get(name) {
                None => return Some(format!("field {} would be removed", name)),
                Some(new) if new != mapping => {
                    return Some(format!(
                        "field {} changes from {} to {}",
                        name,
                        describe(mapping),
                        describe(new)
                    ))
                }
                _ => {}
            }
        }
        for (name, def) in &self.analysis.analyzers {
            match other.analysis.analyzers.get(name) {
                None => return Some(format!("analyzer {} would be removed", name)),
                Some(new) if new != def => {
                    return Some(format!("analyzer {} definition changes", name))
                }
                _ => {}
            }
        }
        None
    }
}

fn describe(mapping: &FieldMapping) -> String {
    match mapping {
        FieldMapping::Text { analyzer } => format!("text({})", analyzer),
        other => other.type_name().to_string(),
    }
}

pub fn tokenizer_capability(name: &str) -> String {
    format!("tokenizer:{}", name)
}

pub fn filter_capability(name: &str) -> String {
    format!("filter:{}", name)
}

/// The configuration applied to every catalog generation.
pub fn catalog_index_config() -> IndexConfig {
    IndexConfig::new(CONFIG_VERSION)
        .with_analyzer(
            "catalog_text",
            AnalyzerDef::new(
                "simple",
                &["remove_long", "lowercase", "ascii_folding", "stemmer_english"],
            ),
        )
        .with_analyzer(
            "catalog_name",
            AnalyzerDef::new("whitespace", &["lowercase", "ascii_folding"]),
        )
        .with_field("title", FieldMapping::text("catalog_text"))
        .with_field("body", FieldMapping::text("catalog_text"))
        .with_field("author", FieldMapping::text("catalog_name"))
        .with_field("category", FieldMapping::Keyword)
        .with_field("tags", FieldMapping::Keyword)
        .with_field("rank", FieldMapping::Integer)
        .with_field("price", FieldMapping::Float)
        .with_field("published", FieldMapping::Boolean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_config_is_valid() {
        let config = catalog_index_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.mappings.contains_key("title"));
    }

    #[test]
    fn test_required_components() {
        let required = catalog_index_config().required_components();
        assert!(required.contains("tokenizer:simple"));
        assert!(required.contains("tokenizer:whitespace"));
        assert!(required.contains("filter:stemmer_english"));
        assert!(required.contains("filter:ascii_folding"));
        assert_eq!(required.len(), 6);
    }

    #[test]
    fn test_validate_rejects_reserved_field() {
        let config = IndexConfig::new(1).with_field(ID_FIELD, FieldMapping::Keyword);
        assert!(matches!(
            config.validate(),
            Err(SearchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_undefined_analyzer() {
        let config = IndexConfig::new(1).with_field("title", FieldMapping::text("nope"));
        assert!(config.validate().is_err());

        let config = IndexConfig::new(1).with_field("title", FieldMapping::text("default"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_additive_conflict() {
        let base = IndexConfig::new(1).with_field("title", FieldMapping::text("default"));

        let added = base.clone().with_field("rank", FieldMapping::Integer);
        assert_eq!(base.additive_conflict(&added), None);

        let changed = IndexConfig::new(1).with_field("title", FieldMapping::Keyword);
        let reason = base.additive_conflict(&changed).unwrap();
        assert_eq!(reason, "field title changes from text(default) to keyword");

        let removed = IndexConfig::new(1).with_field("rank", FieldMapping::Integer);
        assert!(base.additive_conflict(&removed).unwrap().contains("removed"));
    }

    #[test]
    fn test_mapping_serialization() {
        let json = serde_json::to_string(&FieldMapping::text("catalog_text")).unwrap();
        assert_eq!(json, r#"{"type":"text","analyzer":"catalog_text"}"#);

        let decoded: FieldMapping = serde_json::from_str(r#"{"type":"keyword"}"#).unwrap();
        assert_eq!(decoded, FieldMapping::Keyword);
    }
}

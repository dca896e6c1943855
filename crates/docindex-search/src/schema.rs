//! Tantivy schema and analyzer construction from an [`IndexConfig`].
//!
//! Every generation carries a `doc_id` field (STRING | STORED) used as the
//! primary key, plus one field per mapping entry.

use std::collections::{BTreeMap, BTreeSet};

use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, INDEXED, STORED, STRING,
};
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer,
    Stemmer, TextAnalyzer, WhitespaceTokenizer,
};
use tantivy::Index;

use crate::config::{
    filter_capability, tokenizer_capability, AnalysisConfig, AnalyzerDef, FieldMapping,
    IndexConfig, ID_FIELD,
};
use crate::error::SearchError;

const TOKENIZERS: &[&str] = &["simple", "whitespace", "raw"];
const FILTERS: &[&str] = &["lowercase", "ascii_folding", "remove_long", "stemmer_english"];

/// Tokens longer than this are dropped by `remove_long`.
const MAX_TOKEN_LEN: usize = 40;

/// Analysis components the embedded engine can build.
pub fn supported_components() -> BTreeSet<String> {
    TOKENIZERS
        .iter()
        .map(|t| tokenizer_capability(t))
        .chain(FILTERS.iter().map(|f| filter_capability(f)))
        .collect()
}

/// Schema field handles for a generation.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    /// Primary key (STRING | STORED)
    pub doc_id: Field,
    fields: BTreeMap<String, (Field, FieldMapping)>,
}

impl IndexSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Look up a mapped field.
    pub fn field(&self, name: &str) -> Option<&(Field, FieldMapping)> {
        self.fields.get(name)
    }

    /// Resolve field handles from an opened index's schema.
    pub fn from_schema(schema: Schema, config: &IndexConfig) -> Result<Self, SearchError> {
        let doc_id = schema.get_field(ID_FIELD).map_err(|_| {
            SearchError::InvalidConfig(format!("index schema is missing {}", ID_FIELD))
        })?;

        let mut fields = BTreeMap::new();
        for (name, mapping) in &config.mappings {
            let field = schema.get_field(name).map_err(|_| {
                SearchError::InvalidConfig(format!(
                    "index schema is missing mapped field {}",
                    name
                ))
            })?;
            fields.insert(name.clone(), (field, mapping.clone()));
        }

        Ok(Self {
            schema,
            doc_id,
            fields,
        })
    }
}

/// Build the Tantivy schema for a configuration.
pub fn build_schema(config: &IndexConfig) -> IndexSchema {
    let mut builder = Schema::builder();
    let doc_id = builder.add_text_field(ID_FIELD, STRING | STORED);

    let mut fields = BTreeMap::new();
    for (name, mapping) in &config.mappings {
        let field = match mapping {
            FieldMapping::Text { analyzer } => {
                let indexing = TextFieldIndexing::default()
                    .set_tokenizer(analyzer)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions);
                let options = TextOptions::default()
                    .set_indexing_options(indexing)
                    .set_stored();
                builder.add_text_field(name, options)
            }
            FieldMapping::Keyword => builder.add_text_field(name, STRING | STORED),
            FieldMapping::Integer => builder.add_i64_field(name, INDEXED | STORED),
            FieldMapping::Float => builder.add_f64_field(name, INDEXED | STORED),
            FieldMapping::Boolean => builder.add_bool_field(name, INDEXED | STORED),
        };
        fields.insert(name.clone(), (field, mapping.clone()));
    }

    IndexSchema {
        schema: builder.build(),
        doc_id,
        fields,
    }
}

/// Build one analyzer from its definition.
pub fn build_analyzer(def: &AnalyzerDef) -> Result<TextAnalyzer, SearchError> {
    let mut builder = match def.tokenizer.as_str() {
        "simple" => TextAnalyzer::builder(SimpleTokenizer::default()).dynamic(),
        "whitespace" => TextAnalyzer::builder(WhitespaceTokenizer::default()).dynamic(),
        "raw" => TextAnalyzer::builder(RawTokenizer::default()).dynamic(),
        other => return Err(SearchError::PluginMissing(tokenizer_capability(other))),
    };

    for filter in &def.filters {
        builder = match filter.as_str() {
            "lowercase" => builder.filter_dynamic(LowerCaser),
            "ascii_folding" => builder.filter_dynamic(AsciiFoldingFilter),
            "remove_long" => builder.filter_dynamic(RemoveLongFilter::limit(MAX_TOKEN_LEN)),
            "stemmer_english" => builder.filter_dynamic(Stemmer::new(Language::English)),
            other => return Err(SearchError::PluginMissing(filter_capability(other))),
        };
    }

    Ok(builder.build())
}

/// Register every configured analyzer on the index.
///
/// Tantivy does not persist tokenizers, so this runs on create and on every open.
pub fn register_analyzers(index: &Index, analysis: &AnalysisConfig) -> Result<(), SearchError> {
    for (name, def) in &analysis.analyzers {
        index.tokenizers().register(name, build_analyzer(def)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::catalog_index_config;
    use tantivy::tokenizer::TokenStream;

    fn tokens(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
        let mut stream = analyzer.token_stream(text);
        let mut out = Vec::new();
        while stream.advance() {
            out.push(stream.token().text.clone());
        }
        out
    }

    #[test]
    fn test_build_schema_has_all_fields() {
        let config = catalog_index_config();
        let schema = build_schema(&config);

        assert!(schema.schema().get_field(ID_FIELD).is_ok());
        for name in config.mappings.keys() {
            assert!(schema.field(name).is_some(), "missing field {}", name);
        }
    }

    #[test]
    fn test_from_schema_roundtrip() {
        let config = catalog_index_config();
        let built = build_schema(&config);
        let resolved = IndexSchema::from_schema(built.schema().clone(), &config).unwrap();
        assert_eq!(resolved.doc_id, built.doc_id);
    }

    #[test]
    fn test_from_schema_detects_missing_field() {
        let config = catalog_index_config();
        let built = build_schema(&config);
        let wider = config
            .clone()
            .with_field("extra", FieldMapping::Keyword);
        assert!(IndexSchema::from_schema(built.schema().clone(), &wider).is_err());
    }

    #[test]
    fn test_catalog_text_analyzer() {
        let def = AnalyzerDef::new(
            "simple",
            &["remove_long", "lowercase", "ascii_folding", "stemmer_english"],
        );
        let mut analyzer = build_analyzer(&def).unwrap();
        assert_eq!(
            tokens(&mut analyzer, "Running Café Engines"),
            vec!["run", "cafe", "engin"]
        );
    }

    #[test]
    fn test_unknown_component_is_plugin_missing() {
        let def = AnalyzerDef::new("icu", &[]);
        assert!(matches!(
            build_analyzer(&def),
            Err(SearchError::PluginMissing(c)) if c == "tokenizer:icu"
        ));

        let def = AnalyzerDef::new("simple", &["phonetic"]);
        assert!(matches!(
            build_analyzer(&def),
            Err(SearchError::PluginMissing(c)) if c == "filter:phonetic"
        ));
    }

    #[test]
    fn test_supported_components_cover_catalog_config() {
        let supported = supported_components();
        for required in catalog_index_config().required_components() {
            assert!(supported.contains(&required), "missing {}", required);
        }
    }
}

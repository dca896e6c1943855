//! Search engine client contract.
//!
//! The alias manager and the bulk indexer only ever talk to the engine
//! through [`SearchEngine`]. Two properties are load-bearing:
//! - [`SearchEngine::update_aliases`] applies all of its actions atomically
//! - [`SearchEngine::bulk`] reports an outcome for every document it was given

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use docindex_types::Document;

use crate::config::IndexConfig;
use crate::error::SearchError;

/// How a bulk write treats a document id that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail the document if its id is already present
    Create,
    /// Replace any existing document with the same id
    Upsert,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Create => write!(f, "create"),
            WriteMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// One step of an alias update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

/// Per-document result of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Written,
    Failed { reason: String },
}

/// Outcome for one document id in a bulk response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: String,
    pub outcome: BulkOutcome,
}

impl BulkItem {
    pub fn written(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: BulkOutcome::Written,
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: BulkOutcome::Failed {
                reason: reason.into(),
            },
        }
    }
}

/// Operations the reindex pipeline needs from a search engine.
pub trait SearchEngine: Send + Sync {
    /// Analysis components installed on the engine (`tokenizer:<name>`, `filter:<name>`).
    fn capabilities(&self) -> Result<BTreeSet<String>, SearchError>;

    /// Create an index with mappings and analyzers applied before returning.
    fn create_index(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError>;

    fn index_exists(&self, name: &str) -> Result<bool, SearchError>;

    /// Names of indices starting with `prefix`, sorted.
    fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError>;

    /// Indices the alias is bound to. Empty if the alias does not exist.
    fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError>;

    /// Apply every action in one step, or none of them.
    fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchError>;

    /// Delete an index. Returns [`SearchError::IndexNotFound`] if absent.
    fn delete_index(&self, name: &str) -> Result<(), SearchError>;

    /// Apply configuration to an existing index in place.
    ///
    /// Returns [`SearchError::IncompatibleSettings`] when the change needs a rebuild.
    fn put_settings(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError>;

    /// Write documents, returning one [`BulkItem`] per input document.
    ///
    /// An `Err` means the request as a whole did not go through.
    fn bulk(
        &self,
        index: &str,
        mode: WriteMode,
        docs: &[Document],
    ) -> Result<Vec<BulkItem>, SearchError>;

    fn document_count(&self, index: &str) -> Result<u64, SearchError>;

    fn contains_document(&self, index: &str, id: &str) -> Result<bool, SearchError>;
}

/// Reject alias or index names the engines cannot store safely.
pub fn validate_index_name(name: &str) -> Result<(), SearchError> {
    let valid = !name.is_empty()
        && !name.starts_with(['_', '-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SearchError::InvalidConfig(format!(
            "invalid index name {:?}: use lowercase letters, digits, '_' and '-'",
            name
        )))
    }
}

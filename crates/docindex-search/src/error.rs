//! Search engine error types.

use thiserror::Error;

/// Errors that can occur talking to the search engine or managing aliases.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Engine could not be reached or is refusing requests
    #[error("Search engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A text-analysis component required by the index configuration is not installed
    #[error("Required analysis plugin missing: {0}")]
    PluginMissing(String),

    /// Alias points at more than one index
    #[error("Alias {alias} is bound to multiple indices: {}", indices.join(", "))]
    AmbiguousAlias { alias: String, indices: Vec<String> },

    /// Alias does not resolve to any index
    #[error("Alias {0} is not bound to an index")]
    NotAliased(String),

    /// Alias already resolves; bootstrap refused
    #[error("Alias {alias} already points at {index}")]
    AlreadyAliased { alias: String, index: String },

    /// Index not found
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Index with this name already exists
    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    /// Engine rejected a settings change that needs a rebuild
    #[error("Incompatible settings for {index}: {reason}")]
    IncompatibleSettings { index: String, reason: String },

    /// Settings change can only be applied by rebuilding the index
    #[error("{0}")]
    ReindexRequired(String),

    /// Index configuration is malformed
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),

    /// A record could not be turned into a document
    #[error("Invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Index is locked (another process has it open)
    #[error("Index is locked: {0}")]
    IndexLocked(String),
}

impl SearchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::EngineUnavailable(_) | SearchError::IndexLocked(_) | SearchError::Io(_)
        )
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

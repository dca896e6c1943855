//! Error types for the indexing pipeline.

use docindex_search::SearchError;
use docindex_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while indexing or reindexing
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Catalog or settings store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search engine or alias failure
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Reindex started before the alias was bootstrapped
    #[error("cannot reindex if current index is not aliased")]
    NotAliased { alias: String },

    /// Marker value could not be read back
    #[error("Marker error: {0}")]
    Marker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::NotAliased {
            alias: "docs".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot reindex if current index is not aliased"
        );

        let err = IndexingError::Marker("not utf-8".to_string());
        assert_eq!(err.to_string(), "Marker error: not utf-8");
    }

    #[test]
    fn test_from_search_error() {
        let err: IndexingError = SearchError::IndexNotFound("docs_x".to_string()).into();
        assert!(matches!(err, IndexingError::Search(SearchError::IndexNotFound(_))));
        assert_eq!(err.to_string(), "Search error: Index not found: docs_x");
    }
}

//! Reindex progress marker.
//!
//! One row in the settings store naming the generation an in-flight rebuild
//! is writing to. Present only while a rebuild runs, or after one died
//! without reaching its cleanup step.

use std::sync::Arc;

use tracing::debug;

use docindex_search::GenerationId;
use docindex_storage::SettingsStore;

use crate::error::IndexingError;

/// Settings key holding the in-flight generation id.
pub const REINDEX_MARKER_KEY: &str = "reindex.new_index";

/// Typed access to the marker row.
#[derive(Clone)]
pub struct ReindexMarker {
    store: Arc<dyn SettingsStore>,
}

impl ReindexMarker {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// The generation recorded by an in-flight or crashed rebuild.
    pub fn read(&self) -> Result<Option<GenerationId>, IndexingError> {
        match self.store.get_string(REINDEX_MARKER_KEY)? {
            Some(value) if value.is_empty() => Err(IndexingError::Marker(format!(
                "{} holds an empty generation id",
                REINDEX_MARKER_KEY
            ))),
            Some(value) => Ok(Some(GenerationId::from(value))),
            None => Ok(None),
        }
    }

    /// Record `generation`. Durable when this returns.
    pub fn write(&self, generation: &GenerationId) -> Result<(), IndexingError> {
        self.store
            .put(REINDEX_MARKER_KEY, generation.as_str().as_bytes())?;
        debug!(generation = %generation, "Reindex marker written");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IndexingError> {
        self.store.delete(REINDEX_MARKER_KEY)?;
        debug!("Reindex marker cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_storage::MemorySettingsStore;

    #[test]
    fn test_marker_lifecycle() {
        let store = Arc::new(MemorySettingsStore::new());
        let marker = ReindexMarker::new(store.clone());
        assert_eq!(marker.read().unwrap(), None);

        let generation = GenerationId::from("docs_01hx");
        marker.write(&generation).unwrap();
        assert_eq!(marker.read().unwrap(), Some(generation));
        assert_eq!(
            store.get(REINDEX_MARKER_KEY).unwrap(),
            Some(b"docs_01hx".to_vec())
        );

        marker.clear().unwrap();
        assert_eq!(marker.read().unwrap(), None);
        // Clearing twice is fine
        marker.clear().unwrap();
    }

    #[test]
    fn test_empty_marker_is_an_error() {
        let store = Arc::new(MemorySettingsStore::new());
        store.put(REINDEX_MARKER_KEY, b"").unwrap();
        let marker = ReindexMarker::new(store);
        assert!(matches!(marker.read(), Err(IndexingError::Marker(_))));
    }
}

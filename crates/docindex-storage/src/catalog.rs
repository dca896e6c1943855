//! Catalog contract.
//!
//! The catalog is the system of record the index is rebuilt from. It may be
//! far larger than memory, so full enumeration is a lazy iterator; subset
//! lookups take an id slice the caller has already bounded to a batch.

use std::collections::BTreeMap;
use std::sync::RwLock;

use docindex_types::CatalogRecord;

use crate::error::StorageError;

/// Lazily evaluated sequence of catalog records.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<CatalogRecord, StorageError>> + 'a>;

/// Read access to the system of record.
pub trait Catalog: Send + Sync {
    /// Enumerate every record in id order.
    fn scan(&self) -> Result<RecordIter<'_>, StorageError>;

    /// Fetch the records for `ids`. Ids with no record are omitted.
    fn fetch(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, StorageError>;

    /// Number of records currently held.
    fn record_count(&self) -> Result<u64, StorageError>;
}

/// In-memory catalog, ordered by id.
#[derive(Default)]
pub struct MemoryCatalog {
    records: RwLock<BTreeMap<String, CatalogRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from records. Later duplicates replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    pub fn insert(&self, record: CatalogRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.id.clone(), record);
        }
    }

    pub fn remove(&self, id: &str) -> Option<CatalogRecord> {
        self.records.write().ok().and_then(|mut r| r.remove(id))
    }

    fn snapshot(&self) -> Vec<CatalogRecord> {
        self.records
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Catalog for MemoryCatalog {
    fn scan(&self) -> Result<RecordIter<'_>, StorageError> {
        // Snapshot so the iterator does not hold the lock across bulk writes.
        Ok(Box::new(self.snapshot().into_iter().map(Ok)))
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    fn record_count(&self) -> Result<u64, StorageError> {
        Ok(self.records.read().map(|r| r.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> MemoryCatalog {
        MemoryCatalog::from_records(
            (0..n).map(|i| CatalogRecord::new(format!("r{:02}", i)).with_field("title", "t")),
        )
    }

    #[test]
    fn test_scan_is_ordered_by_id() {
        let catalog = MemoryCatalog::from_records(vec![
            CatalogRecord::new("b"),
            CatalogRecord::new("a"),
            CatalogRecord::new("c"),
        ]);

        let ids: Vec<String> = catalog
            .scan()
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fetch_omits_missing_ids() {
        let catalog = sample(3);
        let fetched = catalog
            .fetch(&["r01".to_string(), "nope".to_string(), "r02".to_string()])
            .unwrap();

        let ids: Vec<&str> = fetched.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r01", "r02"]);
    }

    #[test]
    fn test_insert_and_remove() {
        let catalog = sample(2);
        assert_eq!(catalog.record_count().unwrap(), 2);

        catalog.insert(CatalogRecord::new("r00").with_field("title", "replaced"));
        assert_eq!(catalog.record_count().unwrap(), 2);

        assert!(catalog.remove("r00").is_some());
        assert!(catalog.remove("r00").is_none());
        assert_eq!(catalog.record_count().unwrap(), 1);
    }
}

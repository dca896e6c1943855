//! Bulk indexing of catalog records into one generation.
//!
//! Records are read lazily from the catalog and submitted in batches of
//! `batch_size`. Per-record failures never stop a batch; a batch whose bulk
//! request keeps failing after client-side backoff is reported as failed in
//! full. The returned [`IndexRun`] accounts for every record exactly once:
//! written, failed, or (subset runs only) vanished from the catalog.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use docindex_search::{
    record_to_document, with_backoff, BulkOutcome, GenerationId, IndexConfig, RetryPolicy,
    SearchEngine, WriteMode,
};
use docindex_storage::Catalog;
use docindex_types::{CatalogRecord, Settings};

use crate::error::IndexingError;
use crate::progress::{IndexProgress, NoOpProgressCallback, ProgressCallback};

/// Batching and retry knobs for [`BatchIndexer`].
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Records per bulk request
    pub batch_size: usize,
    /// Bulk requests in flight at once
    pub workers: usize,
    pub mode: WriteMode,
    /// Client-side retry for a whole bulk request
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers: 1,
            mode: WriteMode::Create,
            retry: RetryPolicy::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            workers: settings.workers.max(1),
            mode: WriteMode::Create,
            retry: RetryPolicy::default()
                .with_max_attempts(settings.bulk_max_retries)
                .with_initial_interval(Duration::from_millis(settings.bulk_backoff_initial_ms))
                .with_max_elapsed(Duration::from_millis(settings.bulk_backoff_max_elapsed_ms)),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Outcome of one [`BatchIndexer::index`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRun {
    pub written: u64,
    /// Failed record id -> last reason reported
    pub failed: BTreeMap<String, String>,
    /// Requested ids the catalog no longer holds
    pub vanished: Vec<String>,
}

impl IndexRun {
    /// Failed ids in sorted order.
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct BatchResult {
    written: u64,
    failed: Vec<(String, String)>,
}

impl BatchResult {
    fn all_failed(ids: impl IntoIterator<Item = String>, reason: &str) -> Self {
        Self {
            written: 0,
            failed: ids.into_iter().map(|id| (id, reason.to_string())).collect(),
        }
    }
}

/// Writes catalog records into a single target generation.
///
/// Never touches the alias.
pub struct BatchIndexer {
    catalog: Arc<dyn Catalog>,
    engine: Arc<dyn SearchEngine>,
    target: GenerationId,
    index_config: IndexConfig,
    config: IndexerConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl BatchIndexer {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn SearchEngine>,
        target: GenerationId,
        index_config: IndexConfig,
        config: IndexerConfig,
    ) -> Self {
        Self {
            catalog,
            engine,
            target,
            index_config,
            config,
            progress: Arc::new(NoOpProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn target(&self) -> &GenerationId {
        &self.target
    }

    /// Index the whole catalog (`None`) or only `record_ids`.
    ///
    /// Returns `Err` only when the catalog itself cannot be read; engine
    /// failures end up in [`IndexRun::failed`].
    pub fn index(&self, record_ids: Option<&[String]>) -> Result<IndexRun, IndexingError> {
        let mut run = IndexRun::default();
        let mut progress = IndexProgress::new();
        let mut group: Vec<Vec<CatalogRecord>> = Vec::with_capacity(self.config.workers);

        match record_ids {
            None => {
                info!(generation = %self.target, mode = %self.config.mode, "Indexing full catalog");
                let mut batch = Vec::with_capacity(self.config.batch_size);
                for record in self.catalog.scan()? {
                    batch.push(record?);
                    if batch.len() >= self.config.batch_size {
                        group.push(std::mem::take(&mut batch));
                        if group.len() >= self.config.workers {
                            self.flush(&mut group, &mut run, &mut progress);
                        }
                    }
                }
                if !batch.is_empty() {
                    group.push(batch);
                }
            }
            Some(ids) => {
                let unique: Vec<String> = ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
                info!(generation = %self.target, count = unique.len(), "Indexing record subset");
                for chunk in unique.chunks(self.config.batch_size) {
                    let records = self.catalog.fetch(chunk)?;
                    if records.len() < chunk.len() {
                        let found: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
                        for id in chunk.iter().filter(|id| !found.contains(id.as_str())) {
                            debug!(id = %id, "Record no longer in catalog");
                            run.vanished.push(id.clone());
                        }
                    }
                    if !records.is_empty() {
                        group.push(records);
                        if group.len() >= self.config.workers {
                            self.flush(&mut group, &mut run, &mut progress);
                        }
                    }
                }
            }
        }
        self.flush(&mut group, &mut run, &mut progress);

        info!(
            generation = %self.target,
            batches = progress.batches,
            written = run.written,
            failed = run.failed.len(),
            vanished = run.vanished.len(),
            "Indexing pass complete"
        );
        Ok(run)
    }

    /// Submit the pending batches and fold their results into `run`, in batch order.
    fn flush(
        &self,
        group: &mut Vec<Vec<CatalogRecord>>,
        run: &mut IndexRun,
        progress: &mut IndexProgress,
    ) {
        if group.is_empty() {
            return;
        }

        for result in self.submit_group(std::mem::take(group)) {
            progress.record_batch(result.written, result.failed.len() as u64);
            run.written += result.written;
            for (id, reason) in result.failed {
                run.failed.insert(id, reason);
            }
            self.progress.on_batch(progress);
        }
    }

    fn submit_group(&self, batches: Vec<Vec<CatalogRecord>>) -> Vec<BatchResult> {
        if batches.len() <= 1 {
            return batches.into_iter().map(|batch| self.submit(batch)).collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
                    (ids, scope.spawn(move || self.submit(batch)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(ids, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(records = ids.len(), "Indexing worker panicked");
                        BatchResult::all_failed(ids, "indexing worker panicked")
                    })
                })
                .collect()
        })
    }

    /// Transform and write one batch.
    fn submit(&self, records: Vec<CatalogRecord>) -> BatchResult {
        let mut result = BatchResult::default();
        let mut docs = Vec::with_capacity(records.len());

        for record in &records {
            match record_to_document(record, &self.index_config) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    debug!(id = %record.id, error = %e, "Record rejected before submission");
                    result.failed.push((record.id.clone(), e.to_string()));
                }
            }
        }
        if docs.is_empty() {
            return result;
        }

        let response = with_backoff(&self.config.retry, "bulk", || {
            self.engine
                .bulk(self.target.as_str(), self.config.mode, &docs)
        });

        match response {
            Ok(items) => {
                let mut reported = HashSet::with_capacity(items.len());
                for item in items {
                    reported.insert(item.id.clone());
                    match item.outcome {
                        BulkOutcome::Written => result.written += 1,
                        BulkOutcome::Failed { reason } => result.failed.push((item.id, reason)),
                    }
                }
                for doc in docs.iter().filter(|d| !reported.contains(&d.id)) {
                    result
                        .failed
                        .push((doc.id.clone(), "engine reported no outcome".to_string()));
                }
            }
            Err(e) => {
                warn!(
                    generation = %self.target,
                    records = docs.len(),
                    error = %e,
                    "Bulk request failed, marking batch as failed"
                );
                let reason = e.to_string();
                result
                    .failed
                    .extend(docs.into_iter().map(|d| (d.id, reason.clone())));
            }
        }

        debug!(
            generation = %self.target,
            written = result.written,
            failed = result.failed.len(),
            "Batch submitted"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_search::{catalog_index_config, MemoryEngine};
    use docindex_storage::MemoryCatalog;
    use std::sync::Mutex;

    const TARGET: &str = "docs_target";

    fn record(i: usize) -> CatalogRecord {
        CatalogRecord::new(format!("r{:03}", i))
            .with_field("title", format!("Record {}", i))
            .with_field("rank", i as i64)
    }

    fn setup(count: usize) -> (Arc<MemoryCatalog>, Arc<MemoryEngine>) {
        let catalog = Arc::new(MemoryCatalog::from_records((0..count).map(record)));
        let engine = Arc::new(MemoryEngine::new());
        engine.create_index(TARGET, &catalog_index_config()).unwrap();
        (catalog, engine)
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_interval(Duration::from_millis(1))
    }

    fn indexer(
        catalog: &Arc<MemoryCatalog>,
        engine: &Arc<MemoryEngine>,
        config: IndexerConfig,
    ) -> BatchIndexer {
        BatchIndexer::new(
            catalog.clone(),
            engine.clone(),
            GenerationId::from(TARGET),
            catalog_index_config(),
            config.with_retry(fast_retry(3)),
        )
    }

    #[test]
    fn test_full_catalog_in_batches() {
        let (catalog, engine) = setup(10);
        let run = indexer(&catalog, &engine, IndexerConfig::default().with_batch_size(3))
            .index(None)
            .unwrap();

        assert_eq!(run.written, 10);
        assert!(run.failed.is_empty());
        assert_eq!(engine.bulk_calls(), 4);
        assert_eq!(engine.document_count(TARGET).unwrap(), 10);
    }

    #[test]
    fn test_rejected_record_does_not_block_batch() {
        let (catalog, engine) = setup(5);
        engine.reject_document_always("r002");

        let run = indexer(&catalog, &engine, IndexerConfig::default())
            .index(None)
            .unwrap();

        assert_eq!(run.written, 4);
        assert_eq!(run.failed_ids(), vec!["r002"]);
        assert_eq!(run.failed["r002"], "rejected by engine");
    }

    #[test]
    fn test_exhausted_transport_retries_fail_whole_batch() {
        let (catalog, engine) = setup(6);
        engine.fail_next_bulk(3);

        let run = indexer(&catalog, &engine, IndexerConfig::default().with_batch_size(3))
            .index(None)
            .unwrap();

        // First batch burns all three attempts; second goes through.
        assert_eq!(run.failed_ids(), vec!["r000", "r001", "r002"]);
        assert_eq!(run.written, 3);
        assert_eq!(engine.bulk_calls(), 4);
    }

    #[test]
    fn test_transient_failure_recovered_by_backoff() {
        let (catalog, engine) = setup(4);
        engine.fail_next_bulk(1);

        let run = indexer(&catalog, &engine, IndexerConfig::default())
            .index(None)
            .unwrap();
        assert_eq!(run.written, 4);
        assert!(run.failed.is_empty());
    }

    #[test]
    fn test_invalid_record_is_a_failure() {
        let (catalog, engine) = setup(3);
        catalog.insert(CatalogRecord::new("bad").with_field("rank", "high"));

        let run = indexer(&catalog, &engine, IndexerConfig::default())
            .index(None)
            .unwrap();
        assert_eq!(run.written, 3);
        assert_eq!(run.failed_ids(), vec!["bad"]);
        assert!(run.failed["bad"].contains("expected integer"));
    }

    #[test]
    fn test_subset_with_vanished_and_duplicate_ids() {
        let (catalog, engine) = setup(5);
        let ids = vec![
            "r001".to_string(),
            "r003".to_string(),
            "r001".to_string(),
            "gone".to_string(),
        ];

        let run = indexer(&catalog, &engine, IndexerConfig::default())
            .index(Some(&ids))
            .unwrap();

        assert_eq!(run.written, 2);
        assert!(run.failed.is_empty());
        assert_eq!(run.vanished, vec!["gone"]);
        assert_eq!(engine.document_ids(TARGET).unwrap(), vec!["r001", "r003"]);
    }

    #[test]
    fn test_create_mode_reports_existing_documents() {
        let (catalog, engine) = setup(3);
        let indexer = indexer(&catalog, &engine, IndexerConfig::default());
        indexer.index(None).unwrap();

        let run = indexer.index(Some(&["r000".to_string()])).unwrap();
        assert_eq!(run.failed["r000"], "document already exists");
    }

    #[test]
    fn test_parallel_workers_account_for_every_record() {
        let (catalog, engine) = setup(53);
        for id in ["r004", "r017", "r050"] {
            engine.reject_document_always(id);
        }

        let config = IndexerConfig::default().with_batch_size(5).with_workers(4);
        let run = indexer(&catalog, &engine, config).index(None).unwrap();

        assert_eq!(run.written, 50);
        assert_eq!(run.failed_ids(), vec!["r004", "r017", "r050"]);
        assert_eq!(engine.bulk_calls(), 11);
        assert_eq!(engine.document_count(TARGET).unwrap(), 50);
    }

    #[test]
    fn test_catalog_failure_is_an_error() {
        struct BrokenCatalog;
        impl Catalog for BrokenCatalog {
            fn scan(&self) -> Result<docindex_storage::RecordIter<'_>, docindex_storage::StorageError> {
                Err(docindex_storage::StorageError::ColumnFamilyNotFound(
                    "records".to_string(),
                ))
            }
            fn fetch(
                &self,
                _ids: &[String],
            ) -> Result<Vec<CatalogRecord>, docindex_storage::StorageError> {
                Ok(Vec::new())
            }
            fn record_count(&self) -> Result<u64, docindex_storage::StorageError> {
                Ok(0)
            }
        }

        let engine = Arc::new(MemoryEngine::new());
        engine.create_index(TARGET, &catalog_index_config()).unwrap();
        let indexer = BatchIndexer::new(
            Arc::new(BrokenCatalog),
            engine,
            GenerationId::from(TARGET),
            catalog_index_config(),
            IndexerConfig::default(),
        );
        assert!(matches!(indexer.index(None), Err(IndexingError::Storage(_))));
    }

    #[test]
    fn test_progress_reported_per_batch() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<IndexProgress>>);
        impl ProgressCallback for Recorder {
            fn on_batch(&self, progress: &IndexProgress) {
                self.0.lock().unwrap().push(progress.clone());
            }
        }

        let (catalog, engine) = setup(7);
        let recorder = Arc::new(Recorder::default());
        indexer(&catalog, &engine, IndexerConfig::default().with_batch_size(3))
            .with_progress(recorder.clone())
            .index(None)
            .unwrap();

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].processed, 7);
        assert_eq!(seen[2].written, 7);
    }
}

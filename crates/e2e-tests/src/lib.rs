//! End-to-end test infrastructure for docindex.
//!
//! Provides a shared TestHarness, catalog seeding helpers, catalogs that
//! misbehave on demand, and a log capture for asserting on emitted events.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::MakeWriter;

use docindex_indexing::{IndexerConfig, ReindexOrchestrator, REINDEX_MARKER_KEY};
use docindex_search::{
    catalog_index_config, IndexAliasManager, RetryPolicy, SearchEngine, TantivyEngine,
    TantivyEngineConfig,
};
use docindex_storage::{Catalog, RecordIter, SettingsStore, Storage, StorageError};
use docindex_types::CatalogRecord;

pub const ALIAS: &str = "docs";

/// Shared test harness for E2E tests.
///
/// RocksDB storage (catalog + settings) and a Tantivy engine, both in one
/// temp directory.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub engine: Arc<TantivyEngine>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let engine = Arc::new(
            TantivyEngine::open(TantivyEngineConfig::new(temp_dir.path().join("indices")))
                .expect("Failed to open test engine"),
        );

        Self {
            _temp_dir: temp_dir,
            storage,
            engine,
        }
    }

    pub fn aliases(&self) -> IndexAliasManager {
        aliases_for(self.engine.clone())
    }

    /// Orchestrator over this harness's storage and engine.
    pub fn orchestrator(&self) -> ReindexOrchestrator {
        orchestrator_for(self.engine.clone(), self.storage.clone(), self.storage.clone())
    }

    pub fn marker(&self) -> Option<String> {
        read_marker(self.storage.as_ref())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn aliases_for(engine: Arc<dyn SearchEngine>) -> IndexAliasManager {
    IndexAliasManager::new(engine, ALIAS).expect("valid alias")
}

/// Orchestrator with fast client-side retries.
pub fn orchestrator_for(
    engine: Arc<dyn SearchEngine>,
    catalog: Arc<dyn Catalog>,
    settings: Arc<dyn SettingsStore>,
) -> ReindexOrchestrator {
    ReindexOrchestrator::new(engine, catalog, settings, ALIAS)
        .expect("valid alias")
        .with_index_config(catalog_index_config())
        .with_indexer_config(
            IndexerConfig::default().with_batch_size(4).with_retry(
                RetryPolicy::default()
                    .with_max_attempts(2)
                    .with_initial_interval(Duration::from_millis(1)),
            ),
        )
}

pub fn read_marker(settings: &dyn SettingsStore) -> Option<String> {
    settings
        .get_string(REINDEX_MARKER_KEY)
        .expect("Failed to read marker")
}

/// Id of the n-th seeded record, 1-based: `rec-03` for n = 3.
pub fn record_id(n: usize) -> String {
    format!("rec-{:02}", n)
}

/// Catalog records `rec-01` ..= `rec-<count>`.
pub fn create_test_records(count: usize) -> Vec<CatalogRecord> {
    (1..=count)
        .map(|n| {
            CatalogRecord::new(record_id(n))
                .with_field("title", format!("Document {}", n))
                .with_field("body", format!("Body text for document number {}", n))
                .with_field("category", if n % 2 == 0 { "even" } else { "odd" })
                .with_field("rank", n as i64)
                .with_field("published", true)
        })
        .collect()
}

/// Write `count` records into the catalog.
pub fn seed_catalog(storage: &Storage, count: usize) -> Vec<CatalogRecord> {
    let records = create_test_records(count);
    storage
        .put_records(&records)
        .expect("Failed to seed catalog");
    records
}

/// Catalog whose full scan fails, recording the marker value seen at that moment.
pub struct FailingCatalog {
    settings: Arc<dyn SettingsStore>,
    pub marker_at_scan: Mutex<Option<String>>,
}

impl FailingCatalog {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            marker_at_scan: Mutex::new(None),
        }
    }
}

impl Catalog for FailingCatalog {
    fn scan(&self) -> Result<RecordIter<'_>, StorageError> {
        if let Ok(mut seen) = self.marker_at_scan.lock() {
            *seen = self.settings.get_string(REINDEX_MARKER_KEY)?;
        }
        Err(StorageError::Io(io::Error::other("catalog went away")))
    }

    fn fetch(&self, _ids: &[String]) -> Result<Vec<CatalogRecord>, StorageError> {
        Err(StorageError::Io(io::Error::other("catalog went away")))
    }

    fn record_count(&self) -> Result<u64, StorageError> {
        Ok(0)
    }
}

/// Delegating catalog that records the marker value at every scan.
pub struct ProbeCatalog {
    inner: Arc<dyn Catalog>,
    settings: Arc<dyn SettingsStore>,
    pub markers_seen: Mutex<Vec<Option<String>>>,
}

impl ProbeCatalog {
    pub fn new(inner: Arc<dyn Catalog>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            inner,
            settings,
            markers_seen: Mutex::new(Vec::new()),
        }
    }
}

impl Catalog for ProbeCatalog {
    fn scan(&self) -> Result<RecordIter<'_>, StorageError> {
        let marker = self.settings.get_string(REINDEX_MARKER_KEY)?;
        if let Ok(mut seen) = self.markers_seen.lock() {
            seen.push(marker);
        }
        self.inner.scan()
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, StorageError> {
        self.inner.fetch(ids)
    }

    fn record_count(&self) -> Result<u64, StorageError> {
        self.inner.record_count()
    }
}

/// In-memory sink for `tracing` output.
///
/// [`LogCapture::capture`] installs a subscriber for the current thread
/// only, so tests running in parallel do not see each other's events.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buf: self.buf.clone(),
        }
    }
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with every event at DEBUG and above written to this capture.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .map(|b| String::from_utf8_lossy(&b).to_string())
            .unwrap_or_default()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

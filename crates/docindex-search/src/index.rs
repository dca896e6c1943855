//! Embedded Tantivy engine.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/aliases.json            alias -> [index, ...]
//! <root>/indices/<name>/         one Tantivy index per generation
//! <root>/indices/<name>/index_config.json
//! ```
//!
//! The alias table is replaced by write-to-temp, fsync, rename. Readers
//! never take a lock, and always see either the previous table or the new one.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tantivy::collector::Count;
use tantivy::query::TermQuery;
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyError, Term};
use tracing::{debug, info, warn};

use docindex_types::Document;

use crate::config::IndexConfig;
use crate::document::{to_tantivy_doc, validate_document};
use crate::engine::{validate_index_name, AliasAction, BulkItem, SearchEngine, WriteMode};
use crate::error::SearchError;
use crate::schema::{build_schema, register_analyzers, supported_components, IndexSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Tantivy refuses writer budgets below ~15MB per thread.
const MIN_WRITER_MEMORY_MB: usize = 16;

const ALIASES_FILE: &str = "aliases.json";
const INDICES_DIR: &str = "indices";
const CONFIG_FILE: &str = "index_config.json";

type AliasTable = BTreeMap<String, Vec<String>>;

/// Tantivy engine configuration
#[derive(Debug, Clone)]
pub struct TantivyEngineConfig {
    /// Root directory holding every generation and the alias table
    pub root: PathBuf,
    /// Memory budget for each writer in MB
    pub writer_memory_mb: usize,
}

impl TantivyEngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// One opened generation.
struct OpenIndex {
    index: Index,
    reader: IndexReader,
    /// Created on first write
    writer: Mutex<Option<IndexWriter>>,
    schema: IndexSchema,
    config: IndexConfig,
}

impl OpenIndex {
    fn new(index: Index, schema: IndexSchema, config: IndexConfig) -> Result<Self, SearchError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(None),
            schema,
            config,
        })
    }

    fn exists(&self, searcher: &Searcher, id: &str) -> Result<bool, SearchError> {
        let term = Term::from_field_text(self.schema.doc_id, id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)? > 0)
    }
}

/// [`SearchEngine`] backed by Tantivy indices on local disk.
pub struct TantivyEngine {
    config: TantivyEngineConfig,
    open: Mutex<HashMap<String, Arc<OpenIndex>>>,
    /// Serializes alias-table writers and index create/delete
    alias_lock: Mutex<()>,
}

impl TantivyEngine {
    /// Open the engine root, creating directories if needed.
    pub fn open(config: TantivyEngineConfig) -> Result<Self, SearchError> {
        fs::create_dir_all(config.root.join(INDICES_DIR))?;
        info!(root = ?config.root, "Opened tantivy engine");
        Ok(Self {
            config,
            open: Mutex::new(HashMap::new()),
            alias_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn index_dir(&self, name: &str) -> PathBuf {
        self.config.root.join(INDICES_DIR).join(name)
    }

    fn aliases_path(&self) -> PathBuf {
        self.config.root.join(ALIASES_FILE)
    }

    fn writer_budget_bytes(&self) -> usize {
        self.config.writer_memory_mb.max(MIN_WRITER_MEMORY_MB) * 1024 * 1024
    }

    fn read_aliases(&self) -> Result<AliasTable, SearchError> {
        match fs::read(self.aliases_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AliasTable::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn handle(&self, name: &str) -> Result<Arc<OpenIndex>, SearchError> {
        let mut open = self
            .open
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        if let Some(handle) = open.get(name) {
            return Ok(handle.clone());
        }

        if !self.index_exists(name)? {
            return Err(SearchError::IndexNotFound(name.to_string()));
        }
        let dir = self.index_dir(name);
        let config: IndexConfig = serde_json::from_slice(&fs::read(dir.join(CONFIG_FILE))?)?;
        let index = Index::open_in_dir(&dir)?;
        register_analyzers(&index, &config.analysis)?;
        let schema = IndexSchema::from_schema(index.schema(), &config)?;
        let handle = Arc::new(OpenIndex::new(index, schema, config)?);

        debug!(index = name, "Opened index");
        open.insert(name.to_string(), handle.clone());
        Ok(handle)
    }
}

/// Replace `path` with `value` serialized as JSON, durably.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SearchError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Persist the rename itself. Not supported on every platform.
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::File::open(parent).and_then(|d| d.sync_all()) {
            debug!(error = %e, "Directory fsync skipped");
        }
    }
    Ok(())
}

impl SearchEngine for TantivyEngine {
    fn capabilities(&self) -> Result<BTreeSet<String>, SearchError> {
        Ok(supported_components())
    }

    fn create_index(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError> {
        validate_index_name(name)?;
        config.validate()?;
        let available = self.capabilities()?;
        if let Some(missing) = config
            .required_components()
            .into_iter()
            .find(|c| !available.contains(c))
        {
            return Err(SearchError::PluginMissing(missing));
        }

        let _guard = self
            .alias_lock
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let dir = self.index_dir(name);
        if dir.exists() || self.read_aliases()?.contains_key(name) {
            return Err(SearchError::IndexAlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;

        let created = (|| -> Result<OpenIndex, SearchError> {
            let schema = build_schema(config);
            let index = Index::create_in_dir(&dir, schema.schema().clone())?;
            register_analyzers(&index, &config.analysis)?;
            write_json_atomic(&dir.join(CONFIG_FILE), config)?;
            OpenIndex::new(index, schema, config.clone())
        })();

        let handle = match created {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(index = name, error = %cleanup, "Failed to remove partial index");
                }
                return Err(e);
            }
        };

        self.open
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?
            .insert(name.to_string(), Arc::new(handle));

        info!(index = name, version = config.version, "Created index");
        Ok(())
    }

    fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        let dir = self.index_dir(name);
        Ok(dir.join("meta.json").exists() && dir.join(CONFIG_FILE).exists())
    }

    fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.config.root.join(INDICES_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(prefix) && self.index_exists(&name)? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError> {
        Ok(self.read_aliases()?.get(alias).cloned().unwrap_or_default())
    }

    fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchError> {
        let _guard = self
            .alias_lock
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let mut aliases = self.read_aliases()?;
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !self.index_exists(index)? {
                        return Err(SearchError::IndexNotFound(index.clone()));
                    }
                    if self.index_dir(alias).exists() {
                        return Err(SearchError::InvalidConfig(format!(
                            "alias {} collides with an index name",
                            alias
                        )));
                    }
                    let bound = aliases.entry(alias.clone()).or_default();
                    if !bound.contains(index) {
                        bound.push(index.clone());
                        bound.sort();
                    }
                }
                AliasAction::Remove { index, alias } => {
                    let removed = match aliases.get_mut(alias) {
                        Some(bound) => {
                            let before = bound.len();
                            bound.retain(|i| i != index);
                            bound.len() != before
                        }
                        None => false,
                    };
                    if !removed {
                        return Err(SearchError::NotAliased(format!(
                            "{} (on index {})",
                            alias, index
                        )));
                    }
                    if aliases.get(alias).is_some_and(|b| b.is_empty()) {
                        aliases.remove(alias);
                    }
                }
            }
        }

        write_json_atomic(&self.aliases_path(), &aliases)?;
        debug!(actions = actions.len(), "Alias table updated");
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<(), SearchError> {
        validate_index_name(name)?;
        let _guard = self
            .alias_lock
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let dir = self.index_dir(name);
        if !dir.exists() {
            return Err(SearchError::IndexNotFound(name.to_string()));
        }

        // Drop our handle first so the writer lock and mmaps are released.
        self.open
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?
            .remove(name);
        fs::remove_dir_all(&dir)?;

        let mut aliases = self.read_aliases()?;
        let before = aliases.clone();
        for bound in aliases.values_mut() {
            bound.retain(|i| i != name);
        }
        aliases.retain(|_, bound| !bound.is_empty());
        if aliases != before {
            write_json_atomic(&self.aliases_path(), &aliases)?;
        }

        info!(index = name, "Deleted index");
        Ok(())
    }

    fn put_settings(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError> {
        config.validate()?;
        let handle = self.handle(name)?;
        if handle.config == *config {
            debug!(index = name, "Settings unchanged");
            return Ok(());
        }

        let reason = handle.config.additive_conflict(config).unwrap_or_else(|| {
            "tantivy schemas are immutable; new fields need a new generation".to_string()
        });
        Err(SearchError::IncompatibleSettings {
            index: name.to_string(),
            reason,
        })
    }

    fn bulk(
        &self,
        index: &str,
        mode: WriteMode,
        docs: &[Document],
    ) -> Result<Vec<BulkItem>, SearchError> {
        let handle = self.handle(index)?;
        let mut guard = handle
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        if guard.is_none() {
            let writer = handle
                .index
                .writer_with_num_threads(1, self.writer_budget_bytes())
                .map_err(|e| match e {
                    TantivyError::LockFailure(..) => SearchError::IndexLocked(e.to_string()),
                    other => SearchError::Tantivy(other),
                })?;
            *guard = Some(writer);
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| SearchError::IndexLocked(index.to_string()))?;

        let searcher = handle.reader.searcher();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut items = Vec::with_capacity(docs.len());
        let mut pending = 0usize;

        for doc in docs {
            if let Err(reason) = validate_document(doc, &handle.config) {
                items.push(BulkItem::failed(&doc.id, reason));
                continue;
            }
            let tantivy_doc = match to_tantivy_doc(&handle.schema, doc) {
                Ok(d) => d,
                Err(reason) => {
                    items.push(BulkItem::failed(&doc.id, reason));
                    continue;
                }
            };

            match mode {
                WriteMode::Create => {
                    if seen.contains(doc.id.as_str()) || handle.exists(&searcher, &doc.id)? {
                        items.push(BulkItem::failed(&doc.id, "document already exists"));
                        continue;
                    }
                }
                WriteMode::Upsert => {
                    writer.delete_term(Term::from_field_text(handle.schema.doc_id, &doc.id));
                    pending += 1;
                }
            }

            // Nothing is committed after a failed add: a queued upsert delete
            // must not land without its replacement.
            if let Err(e) = writer.add_document(tantivy_doc) {
                if let Err(rollback) = writer.rollback() {
                    warn!(index, error = %rollback, "Rollback after failed add also failed");
                }
                return Err(e.into());
            }
            seen.insert(doc.id.as_str());
            pending += 1;
            items.push(BulkItem::written(&doc.id));
        }

        if pending > 0 {
            if let Err(e) = writer.commit() {
                if let Err(rollback) = writer.rollback() {
                    warn!(index, error = %rollback, "Rollback after failed commit also failed");
                }
                return Err(e.into());
            }
            handle.reader.reload()?;
        }

        debug!(index, mode = %mode, docs = docs.len(), "Bulk request applied");
        Ok(items)
    }

    fn document_count(&self, index: &str) -> Result<u64, SearchError> {
        Ok(self.handle(index)?.reader.searcher().num_docs())
    }

    fn contains_document(&self, index: &str, id: &str) -> Result<bool, SearchError> {
        let handle = self.handle(index)?;
        let searcher = handle.reader.searcher();
        handle.exists(&searcher, id)
    }
}

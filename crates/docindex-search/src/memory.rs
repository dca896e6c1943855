//! In-process search engine with fault injection.
//!
//! Behaves like a cluster that supports atomic alias updates and partial
//! bulk success, and lets tests make it misbehave: reject chosen documents,
//! drop bulk requests, hide analysis plugins, fail deletes, or go offline.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use docindex_types::Document;

use crate::config::IndexConfig;
use crate::document::validate_document;
use crate::engine::{validate_index_name, AliasAction, BulkItem, SearchEngine, WriteMode};
use crate::error::SearchError;
use crate::schema::supported_components;

struct MemIndex {
    config: IndexConfig,
    docs: BTreeMap<String, Map<String, Value>>,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, MemIndex>,
    aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
struct Faults {
    /// Remaining bulk passes in which each id is rejected
    reject: HashMap<String, u32>,
    fail_bulk_calls: u32,
    missing_capabilities: BTreeSet<String>,
    fail_deletes: bool,
    unavailable: bool,
}

/// In-memory [`SearchEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<State>,
    faults: Mutex<Faults>,
    bulk_calls: AtomicU64,
}

fn poisoned<E: std::fmt::Display>(e: E) -> SearchError {
    SearchError::IndexLocked(e.to_string())
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `id` in the next `passes` bulk requests that contain it.
    pub fn reject_document(&self, id: impl Into<String>, passes: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.reject.insert(id.into(), passes);
        }
    }

    /// Reject `id` in every bulk request.
    pub fn reject_document_always(&self, id: impl Into<String>) {
        self.reject_document(id, u32::MAX);
    }

    /// Fail the next `count` bulk requests with [`SearchError::EngineUnavailable`].
    pub fn fail_next_bulk(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_bulk_calls = count;
        }
    }

    /// Pretend an analysis component is not installed.
    pub fn remove_capability(&self, capability: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.missing_capabilities.insert(capability.into());
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_deletes = fail;
        }
    }

    /// Make every call return [`SearchError::EngineUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unavailable = unavailable;
        }
    }

    /// Number of bulk requests received, including failed ones.
    pub fn bulk_calls(&self) -> u64 {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Ids stored in an index, sorted.
    pub fn document_ids(&self, index: &str) -> Result<Vec<String>, SearchError> {
        let state = self.state.read().map_err(poisoned)?;
        let idx = state
            .indices
            .get(index)
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))?;
        Ok(idx.docs.keys().cloned().collect())
    }

    /// Stored configuration of an index.
    pub fn index_config(&self, index: &str) -> Result<IndexConfig, SearchError> {
        let state = self.state.read().map_err(poisoned)?;
        state
            .indices
            .get(index)
            .map(|idx| idx.config.clone())
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
    }

    fn check_available(&self) -> Result<(), SearchError> {
        let faults = self.faults.lock().map_err(poisoned)?;
        if faults.unavailable {
            return Err(SearchError::EngineUnavailable(
                "memory engine is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Consume one rejection for `id`, returning whether it applies.
    fn take_rejection(faults: &mut Faults, id: &str) -> bool {
        match faults.reject.get_mut(id) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

impl SearchEngine for MemoryEngine {
    fn capabilities(&self) -> Result<BTreeSet<String>, SearchError> {
        self.check_available()?;
        let faults = self.faults.lock().map_err(poisoned)?;
        Ok(supported_components()
            .into_iter()
            .filter(|c| !faults.missing_capabilities.contains(c))
            .collect())
    }

    fn create_index(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError> {
        self.check_available()?;
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

        let mut state = self.state.write().map_err(poisoned)?;
        if state.indices.contains_key(name) || state.aliases.contains_key(name) {
            return Err(SearchError::IndexAlreadyExists(name.to_string()));
        }
        state.indices.insert(
            name.to_string(),
            MemIndex {
                config: config.clone(),
                docs: BTreeMap::new(),
            },
        );
        debug!(index = name, "Created in-memory index");
        Ok(())
    }

    fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        self.check_available()?;
        Ok(self.state.read().map_err(poisoned)?.indices.contains_key(name))
    }

    fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.aliases.get(alias).cloned().unwrap_or_default())
    }

    fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchError> {
        self.check_available()?;
        let mut state = self.state.write().map_err(poisoned)?;

        // Apply to a copy; commit only if every action succeeds.
        let mut aliases = state.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !state.indices.contains_key(index) {
                        return Err(SearchError::IndexNotFound(index.clone()));
                    }
                    if state.indices.contains_key(alias) {
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
                    let bound = aliases.get_mut(alias).ok_or_else(|| {
                        SearchError::NotAliased(format!("{} (on index {})", alias, index))
                    })?;
                    let before = bound.len();
                    bound.retain(|i| i != index);
                    if bound.len() == before {
                        return Err(SearchError::NotAliased(format!(
                            "{} (on index {})",
                            alias, index
                        )));
                    }
                    if bound.is_empty() {
                        aliases.remove(alias);
                    }
                }
            }
        }
        state.aliases = aliases;
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<(), SearchError> {
        self.check_available()?;
        if self.faults.lock().map_err(poisoned)?.fail_deletes {
            return Err(SearchError::EngineUnavailable(format!(
                "delete of {} refused",
                name
            )));
        }

        let mut state = self.state.write().map_err(poisoned)?;
        if state.indices.remove(name).is_none() {
            return Err(SearchError::IndexNotFound(name.to_string()));
        }
        for bound in state.aliases.values_mut() {
            bound.retain(|i| i != name);
        }
        state.aliases.retain(|_, bound| !bound.is_empty());
        Ok(())
    }

    fn put_settings(&self, name: &str, config: &IndexConfig) -> Result<(), SearchError> {
        self.check_available()?;
        config.validate()?;
        let mut state = self.state.write().map_err(poisoned)?;
        let idx = state
            .indices
            .get_mut(name)
            .ok_or_else(|| SearchError::IndexNotFound(name.to_string()))?;

        if let Some(reason) = idx.config.additive_conflict(config) {
            return Err(SearchError::IncompatibleSettings {
                index: name.to_string(),
                reason,
            });
        }
        idx.config = config.clone();
        Ok(())
    }

    fn bulk(
        &self,
        index: &str,
        mode: WriteMode,
        docs: &[Document],
    ) -> Result<Vec<BulkItem>, SearchError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut faults = self.faults.lock().map_err(poisoned)?;
        if faults.fail_bulk_calls > 0 {
            faults.fail_bulk_calls -= 1;
            return Err(SearchError::EngineUnavailable(
                "bulk request dropped".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(poisoned)?;
        let idx = state
            .indices
            .get_mut(index)
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))?;

        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            if Self::take_rejection(&mut faults, &doc.id) {
                items.push(BulkItem::failed(&doc.id, "rejected by engine"));
                continue;
            }
            if let Err(reason) = validate_document(doc, &idx.config) {
                items.push(BulkItem::failed(&doc.id, reason));
                continue;
            }
            if mode == WriteMode::Create && idx.docs.contains_key(&doc.id) {
                items.push(BulkItem::failed(&doc.id, "document already exists"));
                continue;
            }
            idx.docs.insert(doc.id.clone(), doc.body.clone());
            items.push(BulkItem::written(&doc.id));
        }
        Ok(items)
    }

    fn document_count(&self, index: &str) -> Result<u64, SearchError> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        state
            .indices
            .get(index)
            .map(|idx| idx.docs.len() as u64)
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
    }

    fn contains_document(&self, index: &str, id: &str) -> Result<bool, SearchError> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        state
            .indices
            .get(index)
            .map(|idx| idx.docs.contains_key(id))
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
    }
}

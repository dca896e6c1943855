//! Alias to generation binding.
//!
//! Readers always go through the alias. A rebuild creates a fresh
//! generation, fills it, and retargets the alias in a single engine request.
//! [`IndexAliasManager`] holds no state of its own; the engine is the
//! source of truth for which generation is live.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::IndexConfig;
use crate::engine::{validate_index_name, AliasAction, SearchEngine};
use crate::error::SearchError;

/// Name of one concrete index generation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    /// Allocate a fresh name: `<alias>_<ulid>`, lowercased.
    pub fn generate(alias: &str) -> Self {
        Self(format!("{}_{}", alias, Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GenerationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GenerationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One generation found on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub id: GenerationId,
    /// Whether the alias currently points here
    pub aliased: bool,
    pub document_count: u64,
}

/// Thin client over the engine's alias table for one alias.
pub struct IndexAliasManager {
    engine: Arc<dyn SearchEngine>,
    alias: String,
}

impl IndexAliasManager {
    pub fn new(engine: Arc<dyn SearchEngine>, alias: impl Into<String>) -> Result<Self, SearchError> {
        let alias = alias.into();
        validate_index_name(&alias)?;
        Ok(Self { engine, alias })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    /// Create a fully configured generation. The alias is not touched.
    ///
    /// Analysis components are checked against the engine first so a
    /// missing plugin fails before anything is created.
    pub fn create_generation(&self, config: &IndexConfig) -> Result<GenerationId, SearchError> {
        config.validate()?;

        let available = self.engine.capabilities()?;
        for required in config.required_components() {
            if !available.contains(&required) {
                return Err(SearchError::PluginMissing(required));
            }
        }

        let id = GenerationId::generate(&self.alias);
        self.engine.create_index(id.as_str(), config)?;
        info!(alias = %self.alias, generation = %id, "Created generation");
        Ok(id)
    }

    /// The generation the alias points at, or `None` before bootstrap.
    pub fn resolve_alias(&self) -> Result<Option<GenerationId>, SearchError> {
        let mut bound = self.engine.get_alias(&self.alias)?;
        match bound.len() {
            0 => Ok(None),
            1 => Ok(bound.pop().map(GenerationId::from)),
            _ => Err(SearchError::AmbiguousAlias {
                alias: self.alias.clone(),
                indices: bound,
            }),
        }
    }

    /// Point the alias at `new_generation` in one request.
    ///
    /// Returns the generation that was previously live.
    pub fn swap_alias(&self, new_generation: &GenerationId) -> Result<GenerationId, SearchError> {
        let old = self
            .resolve_alias()?
            .ok_or_else(|| SearchError::NotAliased(self.alias.clone()))?;

        self.engine.update_aliases(&[
            AliasAction::Remove {
                index: old.to_string(),
                alias: self.alias.clone(),
            },
            AliasAction::Add {
                index: new_generation.to_string(),
                alias: self.alias.clone(),
            },
        ])?;

        info!(alias = %self.alias, from = %old, to = %new_generation, "Alias swapped");
        Ok(old)
    }

    /// Delete a generation. Deleting one that is already gone succeeds.
    pub fn delete_generation(&self, generation: &GenerationId) -> Result<(), SearchError> {
        match self.engine.delete_index(generation.as_str()) {
            Ok(()) => {
                info!(generation = %generation, "Deleted generation");
                Ok(())
            }
            Err(SearchError::IndexNotFound(_)) => {
                debug!(generation = %generation, "Generation already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// First-time setup: create a generation and bind the alias to it.
    pub fn bootstrap(&self, config: &IndexConfig) -> Result<GenerationId, SearchError> {
        if let Some(current) = self.resolve_alias()? {
            return Err(SearchError::AlreadyAliased {
                alias: self.alias.clone(),
                index: current.to_string(),
            });
        }

        let id = self.create_generation(config)?;
        let bind = self.engine.update_aliases(&[AliasAction::Add {
            index: id.to_string(),
            alias: self.alias.clone(),
        }]);
        if let Err(e) = bind {
            if let Err(cleanup) = self.delete_generation(&id) {
                warn!(generation = %id, error = %cleanup, "Failed to remove unbound generation");
            }
            return Err(e);
        }

        info!(alias = %self.alias, generation = %id, "Bootstrapped alias");
        Ok(id)
    }

    /// Every generation belonging to this alias, oldest first.
    pub fn list_generations(&self) -> Result<Vec<GenerationSummary>, SearchError> {
        let bound = self.engine.get_alias(&self.alias)?;
        let prefix = format!("{}_", self.alias);

        self.engine
            .list_indices(&prefix)?
            .into_iter()
            .map(|name| {
                Ok(GenerationSummary {
                    aliased: bound.contains(&name),
                    document_count: self.engine.document_count(&name)?,
                    id: GenerationId::from(name),
                })
            })
            .collect()
    }

    /// Apply `config` in place to the live generation.
    ///
    /// A change the engine can only honour with a rebuild is reported as
    /// [`SearchError::ReindexRequired`].
    pub fn update_settings(&self, config: &IndexConfig) -> Result<GenerationId, SearchError> {
        config.validate()?;
        let current = self
            .resolve_alias()?
            .ok_or_else(|| SearchError::NotAliased(self.alias.clone()))?;

        match self.engine.put_settings(current.as_str(), config) {
            Ok(()) => {
                info!(generation = %current, version = config.version, "Settings applied in place");
                Ok(current)
            }
            Err(SearchError::IncompatibleSettings { index, reason }) => {
                Err(SearchError::ReindexRequired(format!(
                    "settings cannot be applied to {} in place ({}); run `docindex reindex` to rebuild",
                    index, reason
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{catalog_index_config, FieldMapping};
    use crate::memory::MemoryEngine;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn manager() -> (Arc<MemoryEngine>, IndexAliasManager) {
        let engine = Arc::new(MemoryEngine::new());
        let manager = IndexAliasManager::new(engine.clone(), "docs").unwrap();
        (engine, manager)
    }

    #[test]
    fn test_generation_id_format() {
        let id = GenerationId::generate("docs");
        assert!(id.as_str().starts_with("docs_"));
        assert_eq!(id.as_str().len(), "docs_".len() + 26);
        assert_eq!(id.as_str(), id.as_str().to_lowercase());
        assert_ne!(id, GenerationId::generate("docs"));
    }

    #[test]
    fn test_create_generation_leaves_alias_alone() {
        let (engine, manager) = manager();
        let id = manager.create_generation(&catalog_index_config()).unwrap();

        assert!(engine.index_exists(id.as_str()).unwrap());
        assert_eq!(manager.resolve_alias().unwrap(), None);
    }

    #[test]
    fn test_plugin_missing_before_create() {
        let (engine, manager) = manager();
        engine.remove_capability("filter:stemmer_english");

        let err = manager.create_generation(&catalog_index_config()).unwrap_err();
        assert!(matches!(err, SearchError::PluginMissing(c) if c == "filter:stemmer_english"));
        assert!(engine.list_indices("docs_").unwrap().is_empty());
    }

    #[test]
    fn test_create_generation_engine_unavailable() {
        let (engine, manager) = manager();
        engine.set_unavailable(true);
        assert!(matches!(
            manager.create_generation(&catalog_index_config()),
            Err(SearchError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn test_bootstrap_then_swap() {
        let (engine, manager) = manager();
        let g1 = manager.bootstrap(&catalog_index_config()).unwrap();
        assert_eq!(manager.resolve_alias().unwrap(), Some(g1.clone()));

        let g2 = manager.create_generation(&catalog_index_config()).unwrap();
        let old = manager.swap_alias(&g2).unwrap();

        assert_eq!(old, g1);
        assert_eq!(manager.resolve_alias().unwrap(), Some(g2.clone()));
        assert_eq!(engine.get_alias("docs").unwrap(), vec![g2.to_string()]);
    }

    #[test]
    fn test_bootstrap_twice_fails() {
        let (_engine, manager) = manager();
        manager.bootstrap(&catalog_index_config()).unwrap();
        assert!(matches!(
            manager.bootstrap(&catalog_index_config()),
            Err(SearchError::AlreadyAliased { .. })
        ));
    }

    #[test]
    fn test_swap_requires_alias() {
        let (_engine, manager) = manager();
        let g = manager.create_generation(&catalog_index_config()).unwrap();
        assert!(matches!(
            manager.swap_alias(&g),
            Err(SearchError::NotAliased(alias)) if alias == "docs"
        ));
    }

    #[test]
    fn test_ambiguous_alias() {
        let (engine, manager) = manager();
        let a = manager.create_generation(&catalog_index_config()).unwrap();
        let b = manager.create_generation(&catalog_index_config()).unwrap();
        engine
            .update_aliases(&[
                AliasAction::Add {
                    index: a.to_string(),
                    alias: "docs".to_string(),
                },
                AliasAction::Add {
                    index: b.to_string(),
                    alias: "docs".to_string(),
                },
            ])
            .unwrap();

        match manager.resolve_alias() {
            Err(SearchError::AmbiguousAlias { alias, indices }) => {
                assert_eq!(alias, "docs");
                assert_eq!(indices.len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_delete_generation_is_idempotent() {
        let (engine, manager) = manager();
        let g = manager.create_generation(&catalog_index_config()).unwrap();

        manager.delete_generation(&g).unwrap();
        manager.delete_generation(&g).unwrap();
        manager
            .delete_generation(&GenerationId::from("docs_never_existed"))
            .unwrap();
        assert!(!engine.index_exists(g.as_str()).unwrap());
    }

    #[test]
    fn test_list_generations_flags_aliased() {
        let (_engine, manager) = manager();
        let g1 = manager.bootstrap(&catalog_index_config()).unwrap();
        let g2 = manager.create_generation(&catalog_index_config()).unwrap();

        let generations = manager.list_generations().unwrap();
        assert_eq!(generations.len(), 2);
        let live: Vec<_> = generations.iter().filter(|g| g.aliased).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, g1);
        assert!(generations.iter().any(|g| g.id == g2 && !g.aliased));
    }

    #[test]
    fn test_update_settings_reports_reindex_required() {
        let (_engine, manager) = manager();
        manager.bootstrap(&catalog_index_config()).unwrap();

        let additive = catalog_index_config().with_field("isbn", FieldMapping::Keyword);
        manager.update_settings(&additive).unwrap();

        let breaking = catalog_index_config().with_field("rank", FieldMapping::Keyword);
        match manager.update_settings(&breaking) {
            Err(SearchError::ReindexRequired(msg)) => assert!(msg.contains("docindex reindex")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_update_settings_requires_alias() {
        let (_engine, manager) = manager();
        assert!(matches!(
            manager.update_settings(&catalog_index_config()),
            Err(SearchError::NotAliased(_))
        ));
    }

    #[test]
    fn test_readers_never_see_gap_during_swaps() {
        let (engine, manager) = manager();
        let g1 = manager.bootstrap(&catalog_index_config()).unwrap();
        let g2 = manager.create_generation(&catalog_index_config()).unwrap();
        let manager = Arc::new(manager);
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                let stop = stop.clone();
                let (g1, g2) = (g1.to_string(), g2.to_string());
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let bound = engine.get_alias("docs").unwrap();
                        assert_eq!(bound.len(), 1, "alias resolved to {:?}", bound);
                        assert!(bound[0] == g1 || bound[0] == g2);
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let target = if i % 2 == 0 { &g2 } else { &g1 };
            manager.swap_alias(target).unwrap();
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}

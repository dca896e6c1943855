//! Zero-downtime rebuild of the aliased index.
//!
//! A run moves through these states:
//!
//! ```text
//! Start -> Created -> Marked -> Indexing -> [Retrying] -> Swapped -> Cleaned -> Done
//!                                  any failure -> Aborted
//! ```
//!
//! The new generation id is written to the settings store before the first
//! bulk write, so a process that dies mid-run leaves it behind for manual
//! cleanup. Once this run has written its marker, the marker is cleared on
//! every exit path that is not process death. A run that fails earlier
//! leaves any marker from a previous run in place.
//!
//! Readers see the old generation until the swap and the new one after it.
//! A failed run leaves the alias untouched unless the swap already happened.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use docindex_search::{
    catalog_index_config, GenerationId, IndexAliasManager, IndexConfig, SearchEngine,
};
use docindex_storage::{Catalog, SettingsStore};

use crate::batch::{BatchIndexer, IndexerConfig};
use crate::error::IndexingError;
use crate::marker::ReindexMarker;
use crate::progress::{NoOpProgressCallback, ProgressCallback};

/// Where a reindex run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexState {
    Start,
    Created,
    Marked,
    Indexing,
    Retrying,
    Swapped,
    Cleaned,
    Done,
    Aborted,
}

impl fmt::Display for ReindexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReindexState::Start => "start",
            ReindexState::Created => "created",
            ReindexState::Marked => "marked",
            ReindexState::Indexing => "indexing",
            ReindexState::Retrying => "retrying",
            ReindexState::Swapped => "swapped",
            ReindexState::Cleaned => "cleaned",
            ReindexState::Done => "done",
            ReindexState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub old_generation: GenerationId,
    pub new_generation: GenerationId,
    pub written: u64,
    /// Records that failed the first pass
    pub first_pass_failures: usize,
    /// Records still failing after the retry pass
    pub permanently_failed: Vec<String>,
    /// Records that left the catalog between passes
    pub vanished: usize,
    /// False when deleting the previous generation failed
    pub old_generation_deleted: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
    pub state: ReindexState,
}

/// Mutable bookkeeping for one run.
struct RunState {
    state: ReindexState,
    generation: Option<GenerationId>,
    /// Set once this run owns the marker
    marker_written: bool,
}

impl RunState {
    fn transition(&mut self, next: ReindexState) {
        debug!(from = %self.state, to = %next, "Reindex state");
        self.state = next;
    }
}

/// Rebuilds the aliased index from the catalog.
///
/// At most one run per alias should execute at a time; concurrent runs are
/// not detected.
pub struct ReindexOrchestrator {
    aliases: IndexAliasManager,
    catalog: Arc<dyn Catalog>,
    marker: ReindexMarker,
    index_config: IndexConfig,
    indexer_config: IndexerConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl ReindexOrchestrator {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        catalog: Arc<dyn Catalog>,
        settings: Arc<dyn SettingsStore>,
        alias: &str,
    ) -> Result<Self, IndexingError> {
        Ok(Self {
            aliases: IndexAliasManager::new(engine, alias)?,
            catalog,
            marker: ReindexMarker::new(settings),
            index_config: catalog_index_config(),
            indexer_config: IndexerConfig::default(),
            progress: Arc::new(NoOpProgressCallback),
        })
    }

    pub fn with_index_config(mut self, config: IndexConfig) -> Self {
        self.index_config = config;
        self
    }

    /// Write mode is always forced to create.
    pub fn with_indexer_config(mut self, config: IndexerConfig) -> Self {
        self.indexer_config = config;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn aliases(&self) -> &IndexAliasManager {
        &self.aliases
    }

    /// Generation recorded by a run that is in flight or died.
    pub fn pending_marker(&self) -> Result<Option<GenerationId>, IndexingError> {
        self.marker.read()
    }

    /// Run one rebuild to completion.
    pub fn run(&self) -> Result<ReindexReport, IndexingError> {
        let started_at = Utc::now();

        // Precondition: nothing is written if this fails.
        let old = self
            .aliases
            .resolve_alias()?
            .ok_or_else(|| IndexingError::NotAliased {
                alias: self.aliases.alias().to_string(),
            })?;

        match self.marker.read() {
            Ok(Some(abandoned)) => warn!(
                abandoned = %abandoned,
                "Found marker from an unfinished reindex; that generation may need manual deletion"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read existing reindex marker"),
        }

        info!(alias = %self.aliases.alias(), current = %old, "Starting reindex");
        let mut run = RunState {
            state: ReindexState::Start,
            generation: None,
            marker_written: false,
        };

        let result = self.advance(&old, &mut run, started_at);

        let cleared = if run.marker_written {
            self.marker.clear()
        } else {
            Ok(())
        };

        match (result, cleared) {
            (Ok(mut report), Ok(())) => {
                report.finished_at = Utc::now();
                report.state = ReindexState::Done;
                info!(
                    alias = %self.aliases.alias(),
                    generation = %report.new_generation,
                    written = report.written,
                    permanently_failed = report.permanently_failed.len(),
                    "Reindex complete"
                );
                Ok(report)
            }
            (Ok(report), Err(e)) => {
                error!(
                    generation = %report.new_generation,
                    error = %e,
                    "Cutover done but reindex marker could not be cleared"
                );
                Err(e)
            }
            (Err(e), cleared) => {
                if let Err(clear_err) = cleared {
                    error!(error = %clear_err, "Failed to clear reindex marker");
                }
                let generation = run
                    .generation
                    .as_ref()
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "none".to_string());
                let failed_in = run.state;
                run.transition(ReindexState::Aborted);
                error!(
                    generation = %generation,
                    state = %failed_in,
                    error = %e,
                    "Reindex aborted; generation is left for manual cleanup"
                );
                Err(e)
            }
        }
    }

    fn advance(
        &self,
        old: &GenerationId,
        run: &mut RunState,
        started_at: DateTime<Utc>,
    ) -> Result<ReindexReport, IndexingError> {
        let new = self.aliases.create_generation(&self.index_config)?;
        run.generation = Some(new.clone());
        run.transition(ReindexState::Created);

        self.marker.write(&new)?;
        run.marker_written = true;
        run.transition(ReindexState::Marked);

        let indexer = BatchIndexer::new(
            self.catalog.clone(),
            self.aliases.engine().clone(),
            new.clone(),
            self.index_config.clone(),
            self.indexer_config
                .clone()
                .with_mode(docindex_search::WriteMode::Create),
        )
        .with_progress(self.progress.clone());

        run.transition(ReindexState::Indexing);
        let first = indexer.index(None)?;
        let mut written = first.written;
        let mut vanished = first.vanished.len();
        let first_pass_failures = first.failed.len();
        let mut permanently_failed = Vec::new();

        if !first.failed.is_empty() {
            run.transition(ReindexState::Retrying);
            let ids = first.failed_ids();
            info!(generation = %new, count = ids.len(), "Retrying failed records");

            let retry = indexer.index(Some(&ids))?;
            written += retry.written;
            vanished += retry.vanished.len();
            permanently_failed = retry.failed_ids();

            if !permanently_failed.is_empty() {
                warn!(
                    generation = %new,
                    count = permanently_failed.len(),
                    ids = ?permanently_failed,
                    "Records failed after retry"
                );
            }
        }

        let swapped_out = self.aliases.swap_alias(&new)?;
        run.transition(ReindexState::Swapped);
        if swapped_out != *old {
            warn!(
                expected = %old,
                found = %swapped_out,
                "Alias moved during reindex; deleting the generation captured at start"
            );
        }

        let old_generation_deleted = match self.aliases.delete_generation(old) {
            Ok(()) => true,
            Err(e) => {
                warn!(generation = %old, error = %e, "Failed to delete previous generation");
                false
            }
        };
        run.transition(ReindexState::Cleaned);

        Ok(ReindexReport {
            old_generation: old.clone(),
            new_generation: new,
            written,
            first_pass_failures,
            permanently_failed,
            vanished,
            old_generation_deleted,
            started_at,
            finished_at: Utc::now(),
            state: run.state,
        })
    }
}

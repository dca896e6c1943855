//! Command implementations.
//!
//! Each handler returns its result so it can be tested without a terminal;
//! [`run`] does the printing.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use docindex_indexing::{
    IndexerConfig, LoggingProgressCallback, ReindexMarker, ReindexOrchestrator, ReindexReport,
};
use docindex_search::{
    catalog_index_config, GenerationId, GenerationSummary, IndexAliasManager, IndexConfig,
    SearchEngine, SearchError, TantivyEngine, TantivyEngineConfig,
};
use docindex_storage::{Catalog, Storage, StorageStats};
use docindex_types::{CatalogRecord, Settings};

use crate::cli::{Cli, Commands};

/// Records written to RocksDB per import batch.
const IMPORT_BATCH: usize = 1000;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &cli.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(index_root) = &cli.index_root {
        settings.index_root = index_root.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open handles shared by every command.
pub struct Workspace {
    pub settings: Settings,
    pub storage: Arc<Storage>,
    pub engine: Arc<TantivyEngine>,
}

impl Workspace {
    pub fn open(settings: Settings) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let storage = Storage::open(&db_path).context("Failed to open storage")?;

        let engine = TantivyEngine::open(
            TantivyEngineConfig::new(settings.expanded_index_root())
                .with_memory_mb(settings.writer_memory_mb),
        )
        .context("Failed to open index root")?;

        Ok(Self {
            settings,
            storage: Arc::new(storage),
            engine: Arc::new(engine),
        })
    }

    pub fn aliases(&self) -> Result<IndexAliasManager> {
        Ok(IndexAliasManager::new(
            self.engine.clone(),
            self.settings.alias.clone(),
        )?)
    }

    fn marker(&self) -> ReindexMarker {
        ReindexMarker::new(self.storage.clone())
    }
}

/// What `import` did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Lines that were not valid records
    pub skipped: usize,
}

/// What `status` found.
#[derive(Debug)]
pub struct StatusReport {
    pub alias: String,
    pub generation: Option<GenerationId>,
    pub document_count: Option<u64>,
    /// Catalog and settings table sizes
    pub storage: StorageStats,
    pub pending_marker: Option<GenerationId>,
}

/// Bootstrap the alias with a first, empty generation.
pub fn init(ws: &Workspace) -> Result<GenerationId> {
    let generation = ws
        .aliases()?
        .bootstrap(&catalog_index_config())
        .context("Failed to initialize index")?;
    Ok(generation)
}

/// Load JSON Lines records into the catalog. Invalid lines are skipped.
pub fn import_catalog(ws: &Workspace, path: &Path) -> Result<ImportSummary> {
    let file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut summary = ImportSummary::default();
    let mut batch: Vec<CatalogRecord> = Vec::with_capacity(IMPORT_BATCH);

    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match CatalogRecord::from_json_line(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                warn!(line = number + 1, error = %e, "Skipping invalid record");
                summary.skipped += 1;
                continue;
            }
        }
        if batch.len() >= IMPORT_BATCH {
            summary.imported += ws.storage.put_records(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        summary.imported += ws.storage.put_records(&batch)?;
    }

    info!(
        imported = summary.imported,
        skipped = summary.skipped,
        "Catalog import complete"
    );
    Ok(summary)
}

/// Rebuild the aliased index from the catalog.
pub fn reindex(
    ws: &Workspace,
    batch_size: Option<usize>,
    workers: Option<usize>,
) -> Result<ReindexReport> {
    let mut config = IndexerConfig::from_settings(&ws.settings);
    if let Some(size) = batch_size {
        config = config.with_batch_size(size);
    }
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let orchestrator = ReindexOrchestrator::new(
        ws.engine.clone(),
        ws.storage.clone(),
        ws.storage.clone(),
        &ws.settings.alias,
    )?
    .with_indexer_config(config)
    .with_progress(Arc::new(LoggingProgressCallback::new(10)));

    let report = orchestrator.run().context("Reindex failed")?;
    Ok(report)
}

/// Apply the current configuration to the live generation without rebuilding.
pub fn update_settings(ws: &Workspace) -> Result<GenerationId> {
    apply_settings(ws, &catalog_index_config())
}

fn apply_settings(ws: &Workspace, config: &IndexConfig) -> Result<GenerationId> {
    ws.aliases()?
        .update_settings(config)
        .map_err(|e| match e {
            SearchError::ReindexRequired(msg) => anyhow!(msg),
            other => anyhow::Error::new(other).context("Failed to update settings"),
        })
}

pub fn status(ws: &Workspace) -> Result<StatusReport> {
    let generation = ws.aliases()?.resolve_alias()?;
    let document_count = match &generation {
        Some(g) => Some(ws.engine.document_count(g.as_str())?),
        None => None,
    };

    Ok(StatusReport {
        alias: ws.settings.alias.clone(),
        generation,
        document_count,
        storage: ws.storage.get_stats()?,
        pending_marker: ws.marker().read()?,
    })
}

pub fn generations(ws: &Workspace) -> Result<Vec<GenerationSummary>> {
    Ok(ws.aliases()?.list_generations()?)
}

/// Delete an orphaned generation. The aliased one is refused.
pub fn delete_generation(ws: &Workspace, id: &str) -> Result<()> {
    let aliases = ws.aliases()?;
    let generation = GenerationId::from(id);

    if aliases.resolve_alias()?.as_ref() == Some(&generation) {
        bail!(
            "{} is the live generation of alias {}; it cannot be deleted",
            generation,
            aliases.alias()
        );
    }
    if !id.starts_with(&format!("{}_", aliases.alias())) {
        bail!("{} is not a generation of alias {}", id, aliases.alias());
    }

    aliases.delete_generation(&generation)?;
    Ok(())
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;
    let ws = Workspace::open(settings)?;

    match cli.command {
        Commands::Init => {
            let generation = init(&ws)?;
            println!("Alias {} -> {}", ws.settings.alias, generation);
        }
        Commands::Import { file } => {
            let summary = import_catalog(&ws, Path::new(&file))?;
            println!(
                "Imported {} records ({} lines skipped)",
                summary.imported, summary.skipped
            );
        }
        Commands::Reindex {
            batch_size,
            workers,
        } => {
            let report = reindex(&ws, batch_size, workers)?;
            println!(
                "Alias {} -> {} (was {})",
                ws.settings.alias, report.new_generation, report.old_generation
            );
            println!("  Written: {}", report.written);
            println!("  Failed first pass: {}", report.first_pass_failures);
            println!("  Failed permanently: {}", report.permanently_failed.len());
            if !report.old_generation_deleted {
                println!(
                    "  Previous generation {} was not deleted; remove it with delete-generation",
                    report.old_generation
                );
            }
        }
        Commands::UpdateSettings => {
            let generation = update_settings(&ws)?;
            println!("Settings applied to {}", generation);
        }
        Commands::Status => {
            let report = status(&ws)?;
            match (&report.generation, report.document_count) {
                (Some(g), Some(count)) => {
                    println!("Alias {} -> {} ({} documents)", report.alias, g, count)
                }
                _ => println!("Alias {} is not initialized (run `docindex init`)", report.alias),
            }
            println!("Catalog records: {}", report.storage.record_count);
            println!(
                "Storage: {} settings, {} bytes on disk",
                report.storage.settings_count, report.storage.disk_usage_bytes
            );
            if let Some(pending) = report.pending_marker {
                println!(
                    "Unfinished reindex left generation {}; delete it once no run is active",
                    pending
                );
            }
        }
        Commands::Generations => {
            for generation in generations(&ws)? {
                let marker = if generation.aliased { "*" } else { " " };
                println!(
                    "{} {} ({} documents)",
                    marker, generation.id, generation.document_count
                );
            }
        }
        Commands::DeleteGeneration { id } => {
            delete_generation(&ws, &id)?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_search::FieldMapping;
    use std::io::Write;
    use tempfile::TempDir;

    fn workspace() -> (Workspace, TempDir) {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            index_root: dir.path().join("idx").to_string_lossy().to_string(),
            ..Default::default()
        };
        (Workspace::open(settings).unwrap(), dir)
    }

    fn write_jsonl(dir: &TempDir, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join("records.jsonl");
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_import_skips_invalid_lines() {
        let (ws, dir) = workspace();
        let path = write_jsonl(
            &dir,
            &[
                r#"{"id": "a", "title": "Alpha"}"#,
                "",
                "not json",
                r#"{"id": "", "title": "No id"}"#,
                r#"{"id": "b", "title": "Beta", "rank": 2}"#,
            ],
        );

        let summary = import_catalog(&ws, &path).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                imported: 2,
                skipped: 2
            }
        );
        assert_eq!(ws.storage.record_count().unwrap(), 2);
    }

    #[test]
    fn test_init_import_reindex_status() {
        let (ws, dir) = workspace();
        let path = write_jsonl(
            &dir,
            &[
                r#"{"id": "a", "title": "Alpha"}"#,
                r#"{"id": "b", "title": "Beta"}"#,
                r#"{"id": "c", "title": "Gamma"}"#,
            ],
        );
        import_catalog(&ws, &path).unwrap();
        let first = init(&ws).unwrap();

        let report = reindex(&ws, Some(2), None).unwrap();
        assert_eq!(report.old_generation, first);
        assert_eq!(report.written, 3);

        let status = status(&ws).unwrap();
        assert_eq!(status.generation, Some(report.new_generation.clone()));
        assert_eq!(status.document_count, Some(3));
        assert_eq!(status.storage.record_count, 3);
        assert_eq!(status.storage.settings_count, 0);
        assert!(status.storage.disk_usage_bytes > 0);
        assert_eq!(status.pending_marker, None);

        let generations = generations(&ws).unwrap();
        assert_eq!(generations.len(), 1);
        assert!(generations[0].aliased);
    }

    #[test]
    fn test_reindex_before_init_fails() {
        let (ws, _dir) = workspace();
        let err = reindex(&ws, None, None).unwrap_err();
        assert!(format!("{:#}", err).contains("cannot reindex if current index is not aliased"));
    }

    #[test]
    fn test_init_twice_fails() {
        let (ws, _dir) = workspace();
        init(&ws).unwrap();
        assert!(init(&ws).is_err());
    }

    #[test]
    fn test_update_settings_unchanged_config() {
        let (ws, _dir) = workspace();
        let generation = init(&ws).unwrap();
        assert_eq!(update_settings(&ws).unwrap(), generation);
    }

    #[test]
    fn test_update_settings_incompatible_change_asks_for_reindex() {
        let (ws, _dir) = workspace();
        let live = init(&ws).unwrap();
        let wider = catalog_index_config().with_field("isbn", FieldMapping::Keyword);

        let err = apply_settings(&ws, &wider).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains(live.as_str()), "{}", msg);
        assert!(msg.contains("run `docindex reindex`"), "{}", msg);
        assert_eq!(status(&ws).unwrap().generation, Some(live));
    }

    #[test]
    fn test_delete_generation_refuses_live_one() {
        let (ws, _dir) = workspace();
        let live = init(&ws).unwrap();
        let orphan = ws
            .aliases()
            .unwrap()
            .create_generation(&catalog_index_config())
            .unwrap();

        let err = delete_generation(&ws, live.as_str()).unwrap_err();
        assert!(err.to_string().contains("live generation"));

        delete_generation(&ws, orphan.as_str()).unwrap();
        assert!(!ws.engine.index_exists(orphan.as_str()).unwrap());
        // Already gone
        delete_generation(&ws, orphan.as_str()).unwrap();
    }

    #[test]
    fn test_delete_generation_rejects_foreign_name() {
        let (ws, _dir) = workspace();
        init(&ws).unwrap();
        assert!(delete_generation(&ws, "other_index").is_err());
    }
}

//! Configuration loading for docindex.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/docindex/config.toml`.
//!
//! Index mappings and analyzers are NOT configured here; they are fixed in
//! code and versioned with the binary.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::DocIndexError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB directory holding the catalog and settings store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Root directory for index generations and the alias table
    #[serde(default = "default_index_root")]
    pub index_root: String,

    /// Logical index name clients search against
    #[serde(default = "default_alias")]
    pub alias: String,

    /// Records per bulk request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bulk requests in flight at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per bulk request before its records are reported failed
    #[serde(default = "default_bulk_max_retries")]
    pub bulk_max_retries: u32,

    /// First backoff interval between bulk attempts (ms)
    #[serde(default = "default_bulk_backoff_initial_ms")]
    pub bulk_backoff_initial_ms: u64,

    /// Upper bound on time spent retrying one bulk request (ms)
    #[serde(default = "default_bulk_backoff_max_elapsed_ms")]
    pub bulk_backoff_max_elapsed_ms: u64,

    /// Memory budget for each index writer in MB
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn data_dir(leaf: &str) -> String {
    ProjectDirs::from("", "", "docindex")
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(".").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("db")
}

fn default_index_root() -> String {
    data_dir("indices")
}

fn default_alias() -> String {
    "docs".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_workers() -> usize {
    1
}

fn default_bulk_max_retries() -> u32 {
    3
}

fn default_bulk_backoff_initial_ms() -> u64 {
    200
}

fn default_bulk_backoff_max_elapsed_ms() -> u64 {
    30_000
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_root: default_index_root(),
            alias: default_alias(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            bulk_max_retries: default_bulk_max_retries(),
            bulk_backoff_initial_ms: default_bulk_backoff_initial_ms(),
            bulk_backoff_max_elapsed_ms: default_bulk_backoff_max_elapsed_ms(),
            writer_memory_mb: default_writer_memory_mb(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/docindex/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (DOCINDEX_*, e.g. DOCINDEX_BATCH_SIZE)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, DocIndexError> {
        let config_dir = ProjectDirs::from("", "", "docindex")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Self::load_layers(&config_dir.join("config"), cli_config_path)
    }

    fn load_layers(
        default_config_path: &Path,
        cli_config_path: Option<&str>,
    ) -> Result<Self, DocIndexError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Double underscore separates nesting so single underscores stay in key names.
        builder = builder.add_source(
            Environment::with_prefix("DOCINDEX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| DocIndexError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| DocIndexError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), DocIndexError> {
        if self.alias.trim().is_empty() {
            return Err(DocIndexError::Config("alias must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(DocIndexError::Config("batch_size must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(DocIndexError::Config("workers must be > 0".to_string()));
        }
        if self.bulk_max_retries == 0 {
            return Err(DocIndexError::Config(
                "bulk_max_retries must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in index_root to the home directory
    pub fn expanded_index_root(&self) -> PathBuf {
        expand_home(&self.index_root)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.alias, "docs");
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.bulk_max_retries, 3);
        assert_eq!(settings.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docindex.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "alias = \"products\"").unwrap();
        writeln!(file, "batch_size = 25").unwrap();

        let settings =
            Settings::load_layers(&dir.path().join("absent"), Some(path.to_str().unwrap()))
                .unwrap();

        assert_eq!(settings.alias, "products");
        assert_eq!(settings.batch_size, 25);
        // Untouched keys keep their defaults
        assert_eq!(settings.workers, 1);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "batch_size = 0\n").unwrap();

        let err = Settings::load_layers(&dir.path().join("absent"), Some(path.to_str().unwrap()))
            .unwrap_err();
        assert!(matches!(err, DocIndexError::Config(_)));
    }

    #[test]
    fn test_missing_cli_config_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let result =
            Settings::load_layers(&dir.path().join("absent"), Some(missing.to_str().unwrap()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        settings.alias = " ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.workers = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expand_plain_path() {
        let settings = Settings {
            db_path: "/var/lib/docindex/db".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.expanded_db_path(),
            PathBuf::from("/var/lib/docindex/db")
        );
    }
}

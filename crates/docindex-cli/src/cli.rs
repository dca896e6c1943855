//! CLI argument parsing for docindex.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// docindex
///
/// Maintains a search index over a document catalog and rebuilds it
/// without taking readers offline.
#[derive(Parser, Debug)]
#[command(name = "docindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/docindex/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override index root directory
    #[arg(long, global = true)]
    pub index_root: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the first generation and point the alias at it
    Init,

    /// Load catalog records from a JSON Lines file
    Import {
        /// File with one JSON object per line, each carrying an "id"
        file: String,
    },

    /// Rebuild the index into a new generation and cut over
    Reindex {
        /// Records per bulk request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Bulk requests in flight at once
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Apply the current mapping and analysis configuration in place
    UpdateSettings,

    /// Show alias, live generation and any unfinished reindex
    Status,

    /// List every generation of the alias
    Generations,

    /// Delete a generation that is no longer aliased
    DeleteGeneration {
        /// Generation id, as printed by `generations`
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_reindex_overrides() {
        let cli = Cli::parse_from(["docindex", "reindex", "--batch-size", "50", "--workers", "4"]);
        match cli.command {
            Commands::Reindex {
                batch_size,
                workers,
            } => {
                assert_eq!(batch_size, Some(50));
                assert_eq!(workers, Some(4));
            }
            _ => panic!("Expected Reindex command"),
        }
    }

    #[test]
    fn test_cli_import() {
        let cli = Cli::parse_from(["docindex", "import", "records.jsonl"]);
        match cli.command {
            Commands::Import { file } => assert_eq!(file, "records.jsonl"),
            _ => panic!("Expected Import command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "docindex",
            "status",
            "--db-path",
            "/custom/db",
            "--index-root",
            "/custom/idx",
            "-l",
            "debug",
        ]);
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.db_path, Some("/custom/db".to_string()));
        assert_eq!(cli.index_root, Some("/custom/idx".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["docindex", "--config", "/path/to/config.toml", "init"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert!(matches!(cli.command, Commands::Init));
    }

    #[test]
    fn test_cli_kebab_case_commands() {
        let cli = Cli::parse_from(["docindex", "update-settings"]);
        assert!(matches!(cli.command, Commands::UpdateSettings));

        let cli = Cli::parse_from(["docindex", "delete-generation", "docs_01hx"]);
        match cli.command {
            Commands::DeleteGeneration { id } => assert_eq!(id, "docs_01hx"),
            _ => panic!("Expected DeleteGeneration command"),
        }
    }

    #[test]
    fn test_cli_delete_generation_requires_id() {
        assert!(Cli::try_parse_from(["docindex", "delete-generation"]).is_err());
    }
}

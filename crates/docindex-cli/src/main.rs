//! docindex
//!
//! Keeps a search index in sync with a document catalog and rebuilds it
//! into a fresh generation without interrupting readers.
//!
//! # Usage
//!
//! ```bash
//! docindex import records.jsonl
//! docindex init
//! docindex reindex [--batch-size N] [--workers N]
//! docindex update-settings
//! docindex status
//! docindex generations
//! docindex delete-generation <id>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/docindex/config.toml)
//! 3. Environment variables (DOCINDEX_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use docindex_cli::{run, Cli};

fn main() -> Result<()> {
    run(Cli::parse())
}

//! docindex command-line library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    delete_generation, generations, import_catalog, init, load_settings, reindex, run, status,
    update_settings, ImportSummary, StatusReport, Workspace,
};

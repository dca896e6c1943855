//! # docindex-search
//!
//! Search index lifecycle for docindex.
//!
//! Readers reach the index through a stable alias. Each rebuild writes a new
//! generation and retargets the alias in one atomic engine request, so the
//! read path never observes a missing or half-built index.
//!
//! ## Features
//! - [`SearchEngine`]: the engine client contract (alias table, bulk writes
//!   with per-document outcomes)
//! - [`TantivyEngine`]: embedded Tantivy implementation, one directory per generation
//! - [`MemoryEngine`]: in-process engine with fault injection
//! - [`IndexAliasManager`]: create, resolve, swap and delete generations
//! - [`IndexConfig`]: versioned field mappings and analyzers

pub mod alias;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod memory;
pub mod retry;
pub mod schema;

pub use alias::{GenerationId, GenerationSummary, IndexAliasManager};
pub use config::{
    catalog_index_config, AnalysisConfig, AnalyzerDef, FieldMapping, IndexConfig, CONFIG_VERSION,
};
pub use document::record_to_document;
pub use engine::{AliasAction, BulkItem, BulkOutcome, SearchEngine, WriteMode};
pub use error::SearchError;
pub use index::{TantivyEngine, TantivyEngineConfig};
pub use memory::MemoryEngine;
pub use retry::{with_backoff, RetryPolicy};

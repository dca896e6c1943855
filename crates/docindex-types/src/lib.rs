//! # docindex-types
//!
//! Shared domain types for the docindex search-index pipeline.
//!
//! - [`CatalogRecord`]: a row from the system of record
//! - [`Document`]: the search-engine representation of a record
//! - [`Settings`]: layered configuration
//! - [`DocIndexError`]: errors raised while loading or validating the above

pub mod config;
pub mod error;
pub mod record;

pub use config::Settings;
pub use error::DocIndexError;
pub use record::{CatalogRecord, Document};

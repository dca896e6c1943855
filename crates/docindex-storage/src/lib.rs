//! Storage layer for docindex.
//!
//! Provides the two durable collaborators the reindex pipeline reads and
//! writes:
//! - [`Catalog`]: the system of record, enumerated lazily in full or by id
//! - [`SettingsStore`]: a small key/value table whose writes are durable on return
//!
//! [`Storage`] implements both on top of RocksDB, one column family each.
//! [`MemoryCatalog`] and [`MemorySettingsStore`] are in-process stand-ins.

pub mod catalog;
pub mod column_families;
pub mod db;
pub mod error;
pub mod settings_store;

pub use catalog::{Catalog, MemoryCatalog, RecordIter};
pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use settings_store::{MemorySettingsStore, SettingsStore};

//! # docindex-indexing
//!
//! Moves catalog records into index generations.
//!
//! - [`BatchIndexer`] writes records into one generation in bounded bulk
//!   batches and reports the ids that did not land
//! - [`ReindexOrchestrator`] rebuilds the aliased index into a new
//!   generation, retries failures once, and cuts readers over atomically
//!
//! An in-flight rebuild is recorded under [`REINDEX_MARKER_KEY`] in the
//! settings store so a crashed run leaves the abandoned generation id behind.

pub mod batch;
pub mod error;
pub mod marker;
pub mod progress;
pub mod reindex;

pub use batch::{BatchIndexer, IndexRun, IndexerConfig};
pub use error::IndexingError;
pub use marker::{ReindexMarker, REINDEX_MARKER_KEY};
pub use progress::{IndexProgress, LoggingProgressCallback, NoOpProgressCallback, ProgressCallback};
pub use reindex::{ReindexOrchestrator, ReindexReport, ReindexState};

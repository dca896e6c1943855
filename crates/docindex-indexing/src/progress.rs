//! Progress reporting for batch indexing.

use tracing::info;

/// Running totals for one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexProgress {
    /// Batches submitted so far
    pub batches: u64,
    /// Records handed to the engine or rejected before submission
    pub processed: u64,
    pub written: u64,
    pub failed: u64,
}

impl IndexProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished batch.
    pub fn record_batch(&mut self, written: u64, failed: u64) {
        self.batches += 1;
        self.written += written;
        self.failed += failed;
        self.processed += written + failed;
    }
}

/// Trait for receiving indexing progress updates.
pub trait ProgressCallback: Send + Sync {
    /// Called after each batch has been accounted for.
    fn on_batch(&self, progress: &IndexProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_batch(&self, _progress: &IndexProgress) {}
}

/// A callback that logs progress at info level every `every` batches.
pub struct LoggingProgressCallback {
    every: u64,
}

impl LoggingProgressCallback {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_batch(&self, progress: &IndexProgress) {
        if progress.batches % self.every == 0 {
            info!(
                batches = progress.batches,
                processed = progress.processed,
                written = progress.written,
                failed = progress.failed,
                "Indexing progress"
            );
        }
    }
}

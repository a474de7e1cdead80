//! Progress reporting for page-by-page ingestion.
//!
//! [`ProgressCallback`] keeps the ingestion loop independent of how
//! progress is rendered (an `indicatif` bar in the CLI, nothing in tests).

use std::sync::Arc;

/// Receives one update per ingested page.
pub trait ProgressCallback: Send + Sync {
    /// Sets the maximum number of pages this run may fetch.
    fn set_total(&self, total: u64);

    /// Advances by `delta` pages.
    fn inc(&self, delta: u64);

    /// Updates the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Marks the run as finished with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch ingestion of paginated upstream events into the event store.
//!
//! A run walks pages `0..=max_page` against a fixed `before_timestamp`,
//! writing each non-empty page as one batch. The first empty page or
//! fetch failure ends the walk; a write failure aborts the run. Once the
//! walk ends, the earliest stored event yields the [`Cursor`] for the
//! next run.

pub mod config;

use std::sync::Arc;
use std::time::Instant;

use event_archive_database::{DbError, EventStore};
use event_archive_models::{Cursor, DEFAULT_MAX_PAGE, PageRequest, RunState, created_date};
use event_archive_source::progress::ProgressCallback;
use event_archive_source::{PageFetcher, PageResult};

/// Errors that abort an ingestion run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Writing a page to the store failed. Earlier pages stay committed.
    #[error("Failed to write page {page_index}: {source}")]
    Write {
        /// Page whose batch failed.
        page_index: u32,
        /// Underlying store error.
        source: DbError,
    },

    /// Any other store error.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Nothing is stored, so there is no cursor to resume from.
    #[error("Event store is empty; no cursor to resume from")]
    EmptyStore,

    /// Run configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Parameters for a single ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Upper time bound sent with every page request.
    pub before_timestamp: i64,
    /// Last page index to request (inclusive).
    pub max_page: u32,
}

impl IngestOptions {
    /// Creates options bounded by `before_timestamp` with the default
    /// page ceiling.
    #[must_use]
    pub const fn new(before_timestamp: i64) -> Self {
        Self {
            before_timestamp,
            max_page: DEFAULT_MAX_PAGE,
        }
    }

    /// Sets the inclusive page ceiling.
    #[must_use]
    pub const fn with_max_page(mut self, max_page: u32) -> Self {
        self.max_page = max_page;
        self
    }
}

/// Why the page walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page at `page_index` came back empty.
    Exhausted {
        /// First empty page.
        page_index: u32,
    },
    /// Fetching the page at `page_index` failed.
    FetchFailed {
        /// Page whose fetch failed.
        page_index: u32,
    },
    /// Every page up to the ceiling was written.
    Ceiling,
}

/// Outcome of [`ingest_pages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Number of batches written.
    pub pages_written: u32,
    /// Number of documents written across all batches.
    pub documents_written: u64,
    /// Why the walk ended.
    pub stop: StopReason,
}

/// The earliest stored event's date and the cursor derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorReport {
    /// Raw `created_date` of the earliest document, if it has one.
    pub created_date: Option<String>,
    /// Parsed cursor, or `None` if the date could not be parsed.
    pub cursor: Option<Cursor>,
}

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Result of the page walk.
    pub summary: IngestSummary,
    /// Cursor for the next run.
    pub cursor: CursorReport,
}

/// Walks pages `0..=options.max_page`, writing each non-empty page to
/// `store` as one batch.
///
/// Stops at the first empty page or fetch failure. Fetch failures are
/// logged and end the walk like exhaustion does.
///
/// # Errors
///
/// Returns [`IngestError::Write`] as soon as a batch fails to write.
/// Batches written before the failure are kept.
#[allow(clippy::future_not_send)]
pub async fn ingest_pages<F, S>(
    fetcher: &F,
    store: &S,
    options: &IngestOptions,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<IngestSummary, IngestError>
where
    F: PageFetcher,
    S: EventStore + ?Sized,
{
    let start = Instant::now();
    let progress = progress.unwrap_or_else(event_archive_source::progress::null_progress);
    progress.set_total(u64::from(options.max_page) + 1);

    log::info!(
        "Ingesting events before {} (pages 0..={})",
        options.before_timestamp,
        options.max_page
    );

    let mut pages_written = 0u32;
    let mut documents_written = 0u64;
    let mut stop = StopReason::Ceiling;

    for page_index in 0..=options.max_page {
        let request = PageRequest::new(page_index, options.before_timestamp);

        let events = match PageResult::from(fetcher.fetch(request).await) {
            PageResult::Events(events) => events,
            PageResult::Exhausted => {
                log::info!("Page {page_index}: no events returned");
                stop = StopReason::Exhausted { page_index };
                break;
            }
            PageResult::Failed(e) => {
                log::warn!("Page {page_index}: fetch failed, stopping: {e}");
                stop = StopReason::FetchFailed { page_index };
                break;
            }
        };

        let inserted = store
            .insert_many(&events)
            .map_err(|source| IngestError::Write { page_index, source })?;

        pages_written += 1;
        documents_written += inserted;

        log::info!(
            "Page {page_index}: fetched {}, inserted {inserted}",
            events.len()
        );
        progress.set_message(format!("page {page_index}: {inserted} events"));
        progress.inc(1);
    }

    progress.finish(format!(
        "{pages_written} pages, {documents_written} events"
    ));

    log::info!(
        "Ingestion stopped ({stop:?}): {documents_written} events in {pages_written} pages, took {:.1}s",
        start.elapsed().as_secs_f64()
    );

    Ok(IngestSummary {
        pages_written,
        documents_written,
        stop,
    })
}

/// Reads the earliest stored event and derives the next run's cursor.
///
/// A date that cannot be parsed is logged and reported without a cursor.
///
/// # Errors
///
/// Returns [`IngestError::EmptyStore`] if nothing is stored, or
/// [`IngestError::Database`] if the query fails.
pub fn derive_cursor<S>(store: &S) -> Result<CursorReport, IngestError>
where
    S: EventStore + ?Sized,
{
    let earliest = store.find_earliest()?.ok_or(IngestError::EmptyStore)?;

    let Some(raw) = created_date(&earliest) else {
        log::warn!("Earliest stored event has no created_date field");
        return Ok(CursorReport {
            created_date: None,
            cursor: None,
        });
    };

    let cursor = match Cursor::from_created_date(raw) {
        Ok(cursor) => Some(cursor),
        Err(e) => {
            log::warn!("{e}");
            None
        }
    };

    Ok(CursorReport {
        created_date: Some(raw.to_owned()),
        cursor,
    })
}

/// Runs a full batch: ingests pages, derives the cursor, and records it
/// as the store's [`RunState`] when one was derived.
///
/// # Errors
///
/// Returns [`IngestError`] if a batch write fails (cursor derivation is
/// skipped), the store is empty after ingestion, or the run state cannot
/// be saved.
#[allow(clippy::future_not_send)]
pub async fn run<F, S>(
    fetcher: &F,
    store: &S,
    options: &IngestOptions,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<RunReport, IngestError>
where
    F: PageFetcher,
    S: EventStore + ?Sized,
{
    let summary = ingest_pages(fetcher, store, options, progress).await?;
    let cursor = derive_cursor(store)?;

    if let Some(last_cursor) = cursor.cursor {
        store.save_run_state(&RunState {
            last_cursor,
            last_run_at: chrono::Utc::now(),
        })?;
        log::info!("Saved cursor {last_cursor} for the next run");
    } else {
        log::warn!("No usable cursor derived; run state left unchanged");
    }

    Ok(RunReport { summary, cursor })
}

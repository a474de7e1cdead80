#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Document store for archived events.
//!
//! Events are appended page by page through [`EventStore::insert_many`]
//! and never updated or deleted. The store also keeps the [`RunState`]
//! that carries the cursor from one run to the next.

pub mod event_db;
pub mod paths;

use event_archive_models::{EventDocument, RunState};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document is not valid JSON.
    #[error("Stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The collection name cannot be used as a table name.
    #[error("Invalid collection name {name:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidCollection {
        /// The rejected name.
        name: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Append-only store of event documents.
pub trait EventStore {
    /// Writes one page of documents as a single batch.
    ///
    /// Returns the number of documents written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the batch cannot be written. Nothing from a
    /// failed batch is kept.
    fn insert_many(&self, documents: &[EventDocument]) -> Result<u64, DbError>;

    /// Returns the document with the earliest created date, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn find_earliest(&self) -> Result<Option<EventDocument>, DbError>;

    /// Returns the number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn record_count(&self) -> Result<u64, DbError>;

    /// Loads the state left by the previous run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the stored state is
    /// malformed.
    fn load_run_state(&self) -> Result<Option<RunState>, DbError>;

    /// Persists the state for the next run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    fn save_run_state(&self, state: &RunState) -> Result<(), DbError>;
}

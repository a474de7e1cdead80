//! `DuckDB`-backed [`EventStore`].
//!
//! Each collection is a table holding the raw document as JSON text plus
//! its `created_date`, both as the original string and parsed into unix
//! microseconds. Ordering always goes through the parsed column, so
//! documents whose dates differ in precision or padding still sort
//! chronologically. A shared `_meta` table holds per-collection run
//! state.

use std::path::Path;

use duckdb::Connection;
use event_archive_models::{Cursor, EventDocument, RunState, created_date, parse_created_date};

use crate::{DbError, EventStore};

/// Number of rows per INSERT statement.
const CHUNK_SIZE: usize = 5_000;

const LAST_CURSOR_KEY: &str = "last_cursor";
const LAST_RUN_AT_KEY: &str = "last_run_at";

/// Event store backed by a single `DuckDB` connection.
///
/// The connection is opened once and closed when the store is dropped.
pub struct DuckDbEventStore {
    conn: Connection,
    collection: String,
}

impl std::fmt::Debug for DuckDbEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbEventStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl DuckDbEventStore {
    /// Opens (or creates) the store file at `path` and ensures the
    /// collection's schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the collection name is invalid, the data
    /// directory cannot be created, or the connection or schema creation
    /// fails.
    pub fn open(path: &Path, collection: &str) -> Result<Self, DbError> {
        validate_collection(collection)?;

        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        log::debug!(
            "Opening event store {} (collection {collection})",
            path.display()
        );
        Self::init(Connection::open(path)?, collection)
    }

    /// Opens a transient in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the collection name is invalid or schema
    /// creation fails.
    pub fn open_in_memory(collection: &str) -> Result<Self, DbError> {
        validate_collection(collection)?;
        Self::init(Connection::open_in_memory()?, collection)
    }

    fn init(conn: Connection, collection: &str) -> Result<Self, DbError> {
        let store = Self {
            conn,
            collection: collection.to_owned(),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// The collection (table) this store writes to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn create_schema(&self) -> Result<(), DbError> {
        let c = &self.collection;
        self.conn.execute_batch(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {c}_id_seq;

            CREATE TABLE IF NOT EXISTS {c} (
                id BIGINT PRIMARY KEY DEFAULT nextval('{c}_id_seq'),
                created_date TEXT,
                created_at_us BIGINT,
                document TEXT NOT NULL,
                ingested_at TIMESTAMP NOT NULL DEFAULT current_timestamp
            );

            CREATE TABLE IF NOT EXISTS _meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );"
        ))?;

        Ok(())
    }

    fn insert_chunk(&self, chunk: &[EventDocument]) -> Result<u64, DbError> {
        let mut sql = format!(
            "INSERT INTO {} (created_date, created_at_us, document) VALUES ",
            self.collection
        );
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?)");
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for document in chunk {
            let raw = created_date(document);
            let created_at_us = raw
                .and_then(|s| parse_created_date(s).ok())
                .map(|dt| dt.timestamp_micros());
            let json = serde_json::to_string(document)?;

            stmt.raw_bind_parameter(param_idx, raw)?;
            stmt.raw_bind_parameter(param_idx + 1, created_at_us)?;
            stmt.raw_bind_parameter(param_idx + 2, json)?;

            param_idx += 3;
        }

        let rows = stmt.raw_execute()?;
        Ok(u64::try_from(rows).unwrap_or(0))
    }

    fn meta_key(&self, key: &str) -> String {
        format!("{}.{key}", self.collection)
    }

    /// Gets a metadata value for this collection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
        let result = stmt.query_row([self.meta_key(key)], |row| row.get(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    /// Sets a metadata value for this collection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the upsert fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO _meta (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            duckdb::params![self.meta_key(key), value],
        )?;
        Ok(())
    }
}

impl EventStore for DuckDbEventStore {
    fn insert_many(&self, documents: &[EventDocument]) -> Result<u64, DbError> {
        if documents.is_empty() {
            return Ok(0);
        }

        self.conn.execute_batch("BEGIN TRANSACTION")?;

        let mut total_inserted = 0u64;
        for chunk in documents.chunks(CHUNK_SIZE) {
            match self.insert_chunk(chunk) {
                Ok(rows) => total_inserted += rows,
                Err(e) => {
                    if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                        log::error!("Rollback of failed batch also failed: {rollback}");
                    }
                    return Err(e);
                }
            }
        }

        self.conn.execute_batch("COMMIT")?;

        Ok(total_inserted)
    }

    fn find_earliest(&self) -> Result<Option<EventDocument>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT document FROM {}
             ORDER BY created_at_us ASC NULLS LAST, created_date ASC NULLS LAST, id ASC
             LIMIT 1",
            self.collection
        ))?;

        let result: Result<String, _> = stmt.query_row([], |row| row.get(0));
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    fn record_count(&self) -> Result<u64, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT COUNT(*) FROM {}", self.collection))?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    fn load_run_state(&self) -> Result<Option<RunState>, DbError> {
        let (Some(cursor), Some(run_at)) = (
            self.get_meta(LAST_CURSOR_KEY)?,
            self.get_meta(LAST_RUN_AT_KEY)?,
        ) else {
            return Ok(None);
        };

        let last_cursor = cursor.parse::<i64>().map_err(|e| DbError::Conversion {
            message: format!("stored cursor {cursor:?} is not an integer: {e}"),
        })?;
        let last_run_at = chrono::DateTime::parse_from_rfc3339(&run_at)
            .map_err(|e| DbError::Conversion {
                message: format!("stored run time {run_at:?} is not RFC 3339: {e}"),
            })?
            .with_timezone(&chrono::Utc);

        Ok(Some(RunState {
            last_cursor: Cursor::from_unix(last_cursor),
            last_run_at,
        }))
    }

    fn save_run_state(&self, state: &RunState) -> Result<(), DbError> {
        self.set_meta(LAST_CURSOR_KEY, &state.last_cursor.to_string())?;
        self.set_meta(LAST_RUN_AT_KEY, &state.last_run_at.to_rfc3339())?;
        Ok(())
    }
}

/// Checks that `name` can be used unquoted as a table name.
///
/// # Errors
///
/// Returns [`DbError::InvalidCollection`] otherwise.
pub fn validate_collection(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name != "_meta";

    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidCollection {
            name: name.to_owned(),
        })
    }
}

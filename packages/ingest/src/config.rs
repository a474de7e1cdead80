//! Run configuration from environment variables.
//!
//! Every setting has an `EVENT_ARCHIVE_*` variable; command-line flags
//! override them in `main`. Variables may also come from a `.env` file,
//! which never overrides the real environment.

use std::path::{Path, PathBuf};

use event_archive_models::{DEFAULT_MAX_PAGE, RunState};
use event_archive_source::events_api::DEFAULT_EVENTS_URL;

use crate::IngestError;

/// Path of the `DuckDB` store file.
pub const DB_ENV: &str = "EVENT_ARCHIVE_DB";
/// Collection (table) events are written to.
pub const COLLECTION_ENV: &str = "EVENT_ARCHIVE_COLLECTION";
/// Seed `before_timestamp` for the run.
pub const BEFORE_ENV: &str = "EVENT_ARCHIVE_BEFORE";
/// Inclusive page ceiling.
pub const MAX_PAGE_ENV: &str = "EVENT_ARCHIVE_MAX_PAGE";
/// Events endpoint.
pub const API_URL_ENV: &str = "EVENT_ARCHIVE_API_URL";
/// API key sent with every request.
pub const API_KEY_ENV: &str = "EVENT_ARCHIVE_API_KEY";

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "events";

/// Settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Store file.
    pub db_path: PathBuf,
    /// Collection (table) name.
    pub collection: String,
    /// Seed `before_timestamp` as configured, parsed only when no flag
    /// overrides it.
    pub before: Option<String>,
    /// Inclusive page ceiling as configured, parsed only when no flag
    /// overrides it.
    pub max_page: Option<String>,
    /// Events endpoint.
    pub api_url: String,
    /// Optional API key.
    pub api_key: Option<String>,
}

impl Settings {
    /// Reads settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for
    /// unset or blank variables.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            db_path: get(DB_ENV).map_or_else(
                event_archive_database::paths::default_db_path,
                PathBuf::from,
            ),
            collection: get(COLLECTION_ENV).unwrap_or_else(|| DEFAULT_COLLECTION.to_owned()),
            before: get(BEFORE_ENV),
            max_page: get(MAX_PAGE_ENV),
            api_url: get(API_URL_ENV).unwrap_or_else(|| DEFAULT_EVENTS_URL.to_owned()),
            api_key: get(API_KEY_ENV),
        }
    }

    /// The seed `before_timestamp`: `flag` if given, else the configured
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if `flag` is `None` and the
    /// configured value is not an integer.
    pub fn before(&self, flag: Option<i64>) -> Result<Option<i64>, IngestError> {
        match flag {
            Some(before) => Ok(Some(before)),
            None => self
                .before
                .as_deref()
                .map(|v| parse_number(BEFORE_ENV, v))
                .transpose(),
        }
    }

    /// The inclusive page ceiling: `flag` if given, else the configured
    /// value, else [`DEFAULT_MAX_PAGE`].
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if `flag` is `None` and the
    /// configured value is not a non-negative integer.
    pub fn max_page(&self, flag: Option<u32>) -> Result<u32, IngestError> {
        match flag {
            Some(max_page) => Ok(max_page),
            None => Ok(self
                .max_page
                .as_deref()
                .map(|v| parse_number(MAX_PAGE_ENV, v))
                .transpose()?
                .unwrap_or(DEFAULT_MAX_PAGE)),
        }
    }
}

/// Loads a `.env` file into the process environment: the one at `path`,
/// or the first `.env` found from the working directory upwards.
///
/// Returns the loaded file, or `None` if there was none.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if the file exists but cannot be read
/// or parsed.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, IngestError> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };

    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(IngestError::Config(format!("failed to load .env file: {e}"))),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, IngestError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| IngestError::Config(format!("{key}={value:?}: {e}")))
}

/// Picks the `before_timestamp` for a run.
///
/// An explicit value wins. Otherwise `resume` takes the cursor saved by
/// the previous run.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if no explicit value is given and
/// either `resume` is off or no run state has been saved.
pub fn resolve_before(
    explicit: Option<i64>,
    resume: bool,
    state: Option<&RunState>,
) -> Result<i64, IngestError> {
    if let Some(before) = explicit {
        return Ok(before);
    }

    if resume {
        return state.map(|s| s.last_cursor.unix()).ok_or_else(|| {
            IngestError::Config("--resume given but no previous run state is stored".to_owned())
        });
    }

    Err(IngestError::Config(format!(
        "no before timestamp: pass --before, set {BEFORE_ENV}, or use --resume"
    )))
}

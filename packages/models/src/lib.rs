#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Event document, page request, cursor, and run state types.
//!
//! Upstream events are never given a schema. They travel through the
//! fetcher and into the store as [`EventDocument`] maps, and only the
//! [`CREATED_DATE_FIELD`] is ever read back out of them, to derive the
//! [`Cursor`] that bounds the next run.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream event, kept as an ordered JSON object.
pub type EventDocument = serde_json::Map<String, serde_json::Value>;

/// Field holding the event's creation timestamp.
pub const CREATED_DATE_FIELD: &str = "created_date";

/// Format of [`CREATED_DATE_FIELD`] values. The fractional part is
/// optional and accepts up to nanosecond precision; the value is UTC.
pub const CREATED_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Number of events requested per page.
pub const PAGE_SIZE: u32 = 50;

/// Default inclusive page ceiling (201 requests at most), matching the
/// upstream API's pagination cap.
pub const DEFAULT_MAX_PAGE: u32 = 200;

/// A request for a single page of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page_index: u32,
    /// Only events that occurred before this unix timestamp are returned.
    pub before_timestamp: i64,
}

impl PageRequest {
    /// Creates a request for `page_index` bounded by `before_timestamp`.
    #[must_use]
    pub const fn new(page_index: u32, before_timestamp: i64) -> Self {
        Self {
            page_index,
            before_timestamp,
        }
    }

    /// Number of events to skip upstream.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index) * u64::from(PAGE_SIZE)
    }

    /// Number of events to request.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        PAGE_SIZE
    }
}

/// Returns the raw [`CREATED_DATE_FIELD`] string of a document, if present.
#[must_use]
pub fn created_date(document: &EventDocument) -> Option<&str> {
    document
        .get(CREATED_DATE_FIELD)
        .and_then(serde_json::Value::as_str)
}

/// Parses a [`CREATED_DATE_FIELD`] value into a UTC instant.
///
/// # Errors
///
/// Returns [`CursorParseError`] if the value does not match
/// [`CREATED_DATE_FORMAT`].
pub fn parse_created_date(value: &str) -> Result<DateTime<Utc>, CursorParseError> {
    NaiveDateTime::parse_from_str(value, CREATED_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| CursorParseError {
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

/// Unix timestamp of the earliest stored event.
///
/// Passed as the next run's `before_timestamp`, it restricts that run to
/// events at or before the oldest one already archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    /// Wraps a unix timestamp.
    #[must_use]
    pub const fn from_unix(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Derives a cursor from a raw [`CREATED_DATE_FIELD`] value.
    ///
    /// # Errors
    ///
    /// Returns [`CursorParseError`] if the value cannot be parsed.
    pub fn from_created_date(value: &str) -> Result<Self, CursorParseError> {
        parse_created_date(value).map(|dt| Self(dt.timestamp()))
    }

    /// The unix timestamp in seconds.
    #[must_use]
    pub const fn unix(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a created date cannot be turned into a [`Cursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorParseError {
    /// The value that failed to parse.
    pub value: String,
    /// Parser message.
    pub reason: String,
}

impl std::fmt::Display for CursorParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid created date {:?}: {} (expected {CREATED_DATE_FORMAT})",
            self.value, self.reason
        )
    }
}

impl std::error::Error for CursorParseError {}

/// State handed from one run to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Cursor derived at the end of the last run.
    pub last_cursor: Cursor,
    /// When that run finished.
    pub last_run_at: DateTime<Utc>,
}

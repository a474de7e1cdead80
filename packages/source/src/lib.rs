#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Paginated event fetcher for the upstream events API.
//!
//! A [`PageFetcher`] turns one [`PageRequest`] into one HTTP call and
//! returns the decoded page. [`events_api::EventsApi`] is the real
//! implementation; callers classify each outcome with [`PageResult`].

pub mod events_api;
pub mod progress;

use event_archive_models::{EventDocument, PageRequest};

/// Errors that can occur while fetching a page.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The response body was not a valid events envelope.
    #[error("Invalid events response: {source} (body: {preview})")]
    Decode {
        /// Underlying parse error.
        source: serde_json::Error,
        /// Leading part of the response body.
        preview: String,
    },

    /// The configured base URL is not a valid absolute URL.
    #[error("Invalid API URL {url:?}: {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// The configured API key cannot be sent as a header value.
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),
}

/// Classified outcome of a single page fetch.
#[derive(Debug)]
pub enum PageResult {
    /// The page held at least one event.
    Events(Vec<EventDocument>),
    /// The page was empty; upstream has nothing more for this window.
    Exhausted,
    /// Transport, status, or decode failure.
    Failed(SourceError),
}

impl From<Result<Vec<EventDocument>, SourceError>> for PageResult {
    fn from(result: Result<Vec<EventDocument>, SourceError>) -> Self {
        match result {
            Ok(events) if events.is_empty() => Self::Exhausted,
            Ok(events) => Self::Events(events),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Fetches one page of events per call.
///
/// Implementations make exactly one attempt per request. An empty page is
/// a normal result, not an error.
pub trait PageFetcher: Send + Sync {
    /// Fetches the page described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails, the API answers with
    /// a non-success status, or the body cannot be decoded.
    fn fetch(
        &self,
        request: PageRequest,
    ) -> impl std::future::Future<Output = Result<Vec<EventDocument>, SourceError>> + Send;
}

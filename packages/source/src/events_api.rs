//! HTTP fetcher for the marketplace events endpoint.
//!
//! Pages are addressed with `offset`/`limit` and bounded above by
//! `occurred_before`. Every request also carries a fixed filter that keeps
//! only successful sales from all marketplace sources. Each page is a
//! single attempt; callers decide what a failure means.

use std::time::Duration;

use event_archive_models::{EventDocument, PageRequest};
use serde::Deserialize;

use crate::{PageFetcher, SourceError};

/// Default events endpoint.
pub const DEFAULT_EVENTS_URL: &str = "https://api.opensea.io/api/v1/events";

/// Header carrying the API key, when one is configured.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Maximum length of the response body preview kept on decode errors.
const BODY_PREVIEW_LEN: usize = 500;

const USER_AGENT: &str = "event-archive/1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Response envelope. Events are opaque; a missing array means no events.
#[derive(Debug, Deserialize)]
struct EventsEnvelope {
    #[serde(default)]
    asset_events: Vec<EventDocument>,
}

/// [`PageFetcher`] backed by the upstream events API.
///
/// Holds one [`reqwest::Client`] for every page of a run.
#[derive(Debug, Clone)]
pub struct EventsApi {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

/// Builder for [`EventsApi`].
#[derive(Debug, Clone)]
pub struct EventsApiBuilder {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl EventsApiBuilder {
    /// Sends `key` in the [`API_KEY_HEADER`] header on every request.
    #[must_use]
    pub fn api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_owned());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the URL and builds the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] if the base URL is not absolute,
    /// [`SourceError::InvalidApiKey`] if the key is not a valid header
    /// value, or [`SourceError::Http`] if the client cannot be built.
    pub fn build(self) -> Result<EventsApi, SourceError> {
        let base_url =
            reqwest::Url::parse(&self.base_url).map_err(|e| SourceError::InvalidUrl {
                url: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|e| SourceError::InvalidApiKey(e.to_string()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(self.timeout)
            .build()?;

        Ok(EventsApi { base_url, client })
    }
}

impl EventsApi {
    /// Starts building a fetcher for the endpoint at `base_url`.
    #[must_use]
    pub fn builder(base_url: &str) -> EventsApiBuilder {
        EventsApiBuilder {
            base_url: base_url.to_owned(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a fetcher for `base_url` with no API key and the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// See [`EventsApiBuilder::build`].
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        Self::builder(base_url).build()
    }

    /// Builds the full request URL for `request`.
    #[must_use]
    pub fn page_url(&self, request: &PageRequest) -> reqwest::Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().extend_pairs(page_query(request));
        url
    }
}

impl PageFetcher for EventsApi {
    async fn fetch(&self, request: PageRequest) -> Result<Vec<EventDocument>, SourceError> {
        let url = self.page_url(&request);

        log::debug!("Fetching events page {}: {url}", request.page_index);

        let response = self.client.get(url.clone()).send().await?;
        check_status(response.status(), &url)?;

        let body = response.text().await?;
        let events = decode_page(&body)?;

        log::debug!(
            "Page {}: {} events ({} bytes)",
            request.page_index,
            events.len(),
            body.len()
        );

        Ok(events)
    }
}

/// Rejects any non-2xx status, including 429.
///
/// # Errors
///
/// Returns [`SourceError::Status`] unless `status` is a success.
pub fn check_status(status: reqwest::StatusCode, url: &reqwest::Url) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }

    log::warn!("{url} answered {status}");
    Err(SourceError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

/// Query parameters for `request`, in the order the API documents them.
#[must_use]
pub fn page_query(request: &PageRequest) -> [(&'static str, String); 5] {
    [
        ("only_opensea", "false".to_owned()),
        ("offset", request.offset().to_string()),
        ("limit", request.limit().to_string()),
        ("occurred_before", request.before_timestamp.to_string()),
        ("event_type", "successful".to_owned()),
    ]
}

/// Decodes an events envelope body into its event documents.
///
/// # Errors
///
/// Returns [`SourceError::Decode`] if the body is not a JSON object whose
/// `asset_events` field (when present) is an array of objects.
pub fn decode_page(body: &str) -> Result<Vec<EventDocument>, SourceError> {
    serde_json::from_str::<EventsEnvelope>(body)
        .map(|envelope| envelope.asset_events)
        .map_err(|source| SourceError::Decode {
            source,
            preview: preview(body),
        })
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_value(url: &reqwest::Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn builds_offset_and_limit_for_every_page() {
        let api = EventsApi::new(DEFAULT_EVENTS_URL).unwrap();
        for page in 0..=200u32 {
            let url = api.page_url(&PageRequest::new(page, 1_615_746_153));
            assert_eq!(
                query_value(&url, "offset"),
                Some((u64::from(page) * 50).to_string())
            );
            assert_eq!(query_value(&url, "limit").as_deref(), Some("50"));
        }
    }

    #[test]
    fn builds_fixed_filter_and_time_bound() {
        let api = EventsApi::new(DEFAULT_EVENTS_URL).unwrap();
        let url = api.page_url(&PageRequest::new(3, 1_615_746_153));
        assert_eq!(
            url.as_str(),
            "https://api.opensea.io/api/v1/events?only_opensea=false&offset=150&limit=50&occurred_before=1615746153&event_type=successful"
        );
    }

    #[test]
    fn keeps_existing_query_on_base_url() {
        let api = EventsApi::new("http://localhost:8080/events?collection=punks").unwrap();
        let url = api.page_url(&PageRequest::new(0, 10));
        assert_eq!(query_value(&url, "collection").as_deref(), Some("punks"));
        assert_eq!(query_value(&url, "offset").as_deref(), Some("0"));
    }

    #[test]
    fn rejects_relative_base_url() {
        assert!(matches!(
            EventsApi::new("/api/v1/events"),
            Err(SourceError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn decodes_events_in_order() {
        let body = serde_json::json!({
            "asset_events": [
                {"id": 2, "created_date": "2021-03-14T12:00:00.000000"},
                {"id": 1, "nested": {"price": "100"}},
            ]
        })
        .to_string();

        let events = decode_page(&body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["id"], 2);
        assert_eq!(events[1]["nested"]["price"], "100");
    }

    #[test]
    fn empty_or_missing_array_is_empty_page() {
        assert!(decode_page(r#"{"asset_events": []}"#).unwrap().is_empty());
        assert!(decode_page(r#"{"detail": "Request was throttled."}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = decode_page("<html>bad gateway</html>").unwrap_err();
        match err {
            SourceError::Decode { preview, .. } => assert_eq!(preview, "<html>bad gateway</html>"),
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            decode_page(r#"{"asset_events": [1, 2]}"#),
            Err(SourceError::Decode { .. })
        ));
    }

    #[test]
    fn preview_is_truncated() {
        let body = "x".repeat(BODY_PREVIEW_LEN + 10);
        let short = preview(&body);
        assert_eq!(short.len(), BODY_PREVIEW_LEN + 3);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn rejects_header_unsafe_api_key() {
        assert!(matches!(
            EventsApi::builder(DEFAULT_EVENTS_URL).api_key("bad\nkey").build(),
            Err(SourceError::InvalidApiKey(_))
        ));
    }

    #[test]
    fn non_success_status_is_failure() {
        let url = reqwest::Url::parse(DEFAULT_EVENTS_URL).unwrap();
        assert!(check_status(reqwest::StatusCode::OK, &url).is_ok());

        for status in [
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            reqwest::StatusCode::NOT_FOUND,
            reqwest::StatusCode::BAD_GATEWAY,
        ] {
            match check_status(status, &url) {
                Err(SourceError::Status { status: code, .. }) => {
                    assert_eq!(code, status.as_u16());
                }
                other => panic!("unexpected result for {status}: {other:?}"),
            }
        }
    }

    /// Answers a single HTTP request with `status_line` and `body`, then
    /// returns the raw request it received.
    fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            write!(
                stream,
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn rate_limited_response_is_status_error() {
        let (url, server) = serve_once("429 Too Many Requests", r#"{"detail": "throttled"}"#);
        let api = EventsApi::new(&url).unwrap();

        let result = api.fetch(PageRequest::new(0, 1_615_746_153)).await;
        assert!(matches!(result, Err(SourceError::Status { status: 429, .. })));
        server.join().unwrap();
    }

    #[tokio::test]
    async fn fetches_page_with_query_and_api_key() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"asset_events": [{"id": 7, "created_date": "2021-03-14T12:00:00"}]}"#,
        );
        let api = EventsApi::builder(&url).api_key("secret").build().unwrap();

        let events = api.fetch(PageRequest::new(2, 1_615_746_153)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], 7);

        let request = server.join().unwrap().to_ascii_lowercase();
        assert!(request.starts_with(
            "get /events?only_opensea=false&offset=100&limit=50&occurred_before=1615746153&event_type=successful "
        ));
        assert!(request.contains("x-api-key: secret"));
        assert!(request.contains("accept: application/json"));
    }

    #[tokio::test]
    async fn transport_error_is_reported_not_retried() {
        let api = EventsApi::builder("http://127.0.0.1:1/events")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let result = api.fetch(PageRequest::new(0, 1_615_746_153)).await;
        assert!(matches!(result, Err(SourceError::Http(_))));
    }
}

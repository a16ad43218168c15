//! Request and response values passed through the offline layer
//!
//! These are plain data: strategies and the queue never see a live
//! connection, only a `FetchRequest` in and a `FetchResponse` out.

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use url::Url;

/// Header set on every response synthesized while offline
pub const OFFLINE_HEADER: &str = "x-spc-offline";

/// Header set on the acknowledgement of a queued mutation
pub const QUEUED_HEADER: &str = "x-spc-queued";

/// How the caller issued the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Full-page navigation
    Navigate,
    /// Ordinary programmatic call
    Fetch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    /// Ordered key/value pairs, names as sent
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub mode: RequestMode,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
            mode: RequestMode::Fetch,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First header value matching `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// GET and HEAD never change server state
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Only full GET responses are stored
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET
    }

    /// Realtime channels must never be intercepted
    pub fn is_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map_or(false, |v| v.eq_ignore_ascii_case("websocket"));
        let event_stream = self
            .header("accept")
            .map_or(false, |v| v.contains("text/event-stream"));
        upgrade || event_stream
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// Identity of a cached response: the URL without its fragment
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Synthesized while offline rather than received from the network
    pub fn is_offline(&self) -> bool {
        self.header(OFFLINE_HEADER).is_some()
    }

    /// Typed offline result for API reads with nothing cached
    pub fn offline_api() -> Self {
        Self::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({
                "error": "offline",
                "message": "No network connection and no cached data available",
                "offline": true,
            }),
        )
        .with_header(OFFLINE_HEADER, "1")
    }

    /// Plain 503 for assets and pages with nothing cached
    pub fn service_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Offline")
            .with_header("content-type", "text/plain")
            .with_header(OFFLINE_HEADER, "1")
    }

    /// Acknowledgement for a mutation that was queued instead of sent
    pub fn queued(id: Option<i64>) -> Self {
        Self::json(
            StatusCode::ACCEPTED,
            &json!({
                "queued": true,
                "queueId": id,
                "message": "Request queued and will be sent when back online",
            }),
        )
        .with_header(OFFLINE_HEADER, "1")
        .with_header(QUEUED_HEADER, "1")
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

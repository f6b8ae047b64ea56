//! Request and response types exchanged through the transport engine.
//!
//! Headers are kept in an insertion-ordered, case-insensitively keyed map so
//! that probes hit the wire with their headers in a stable, caller-controlled
//! order. Both messages carry monotonically assigned ids: every [`Response`]
//! is tied to the id of the [`Request`] that produced it, and additionally
//! carries its own exchange id for correlation with scan findings.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic id source for requests.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic id source for completed exchanges.
static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next exchange id. Called exactly once per completed exchange.
pub(crate) fn next_exchange_id() -> u64 {
    NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Insertion-ordered header map with case-insensitive name lookup.
///
/// `insert` replaces the first existing entry in place (preserving its
/// position) and drops later duplicates; `append` always adds a new entry,
/// which is what response parsing needs for repeated `Set-Cookie` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first header with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values for the given name in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if a header with the given name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing the first existing entry in place and
    /// removing any later duplicates.
    pub fn insert(&mut self, name: &str, value: &str) {
        let mut replaced = false;
        self.entries.retain_mut(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                if replaced {
                    return false;
                }
                *v = value.to_string();
                replaced = true;
            }
            true
        });
        if !replaced {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    /// Adds a header without touching existing entries of the same name.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Removes all headers with the given name.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A logical HTTP request submitted to the engine.
///
/// Immutable once dispatched to the pipeline, except through mangle plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonic request id, assigned at construction.
    id: u64,

    /// HTTP method (uppercased).
    pub method: String,

    /// Target URL.
    pub url: String,

    /// Request headers.
    pub headers: HeaderMap,

    /// Optional raw body, sent as-is. Structured payloads such as multipart
    /// form data are supplied pre-encoded by the caller, with the matching
    /// `Content-Type` header set; the engine only recomputes `Content-Length`.
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Creates a new request with a fresh monotonic id.
    #[must_use]
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Shorthand for a GET request.
    #[must_use]
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Creates a builder for constructing requests.
    #[must_use]
    pub fn builder(method: &str, url: &str) -> RequestBuilder {
        RequestBuilder {
            request: Self::new(method, url),
        }
    }

    /// Returns the request id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true for methods the engine may silently retry and cache.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }
}

/// Builder for constructing requests in a fluent style.
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Builds the request.
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}

/// A completed HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Exchange id, monotonically assigned when the response is produced.
    id: u64,

    /// Id of the request that produced this response.
    request_id: u64,

    /// HTTP status code.
    pub status: u16,

    /// Status line reason phrase.
    pub reason: String,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body bytes (already decompressed by the pipeline).
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a response tied to the request that produced it, assigning a
    /// fresh exchange id.
    #[must_use]
    pub fn new(
        request_id: u64,
        status: u16,
        reason: String,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: next_exchange_id(),
            request_id,
            status,
            reason,
            headers,
            body,
        }
    }

    /// Returns the exchange id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the id of the originating request.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Returns true for 3xx statuses that carry a `Location` header to follow.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as lossy UTF-8, for matching and logging.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

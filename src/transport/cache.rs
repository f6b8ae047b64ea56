//! In-memory response cache for idempotent exchanges.
//!
//! A scan re-requests the same URL from many plugins; serving repeats from
//! memory keeps the wire quiet without changing what callers observe. Keys
//! are derived from the method, the normalized URL, and the subset of headers
//! the configured [`CachePolicy`] includes, so two semantically identical
//! requests hit the same entry regardless of header order, name case, or
//! volatile headers like `Cookie`.

use dashmap::DashMap;
use tracing::debug;

use crate::config::CachePolicy;
use crate::transport::message::{HeaderMap, Request, Response};

/// A derived cache key. Equal keys mean the exchanges are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a request under the given header policy.
    ///
    /// The URL is normalized through a parse/serialize round trip (lowercased
    /// host, default port elided); an unparseable URL falls back to the raw
    /// string, which still yields a self-consistent key.
    pub(crate) fn derive(request: &Request, policy: &CachePolicy) -> Self {
        let normalized_url = url::Url::parse(&request.url)
            .map_or_else(|_| request.url.clone(), |url| url.to_string());

        let mut included: Vec<String> = request
            .headers
            .iter()
            .filter(|(name, _)| policy.includes(name))
            .map(|(name, value)| format!("{}:{}", name.to_ascii_lowercase(), value.trim()))
            .collect();
        included.sort_unstable();

        let mut key = format!("{} {normalized_url}", request.method);
        for header in included {
            key.push('\n');
            key.push_str(&header);
        }
        Self(key)
    }
}

/// One stored exchange. The originating ids are deliberately absent: a hit
/// produces a fresh [`Response`] tied to the request that asked.
struct CachedEntry {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Concurrent response store keyed by [`CacheKey`].
#[derive(Default)]
pub(crate) struct ResponseCache {
    entries: DashMap<CacheKey, CachedEntry>,
}

impl ResponseCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Looks up a stored exchange, materializing it as a response to the
    /// asking request.
    pub(crate) fn get(&self, key: &CacheKey, request_id: u64) -> Option<Response> {
        let entry = self.entries.get(key)?;
        debug!(request_id, "serving response from cache");
        Some(Response::new(
            request_id,
            entry.status,
            entry.reason.clone(),
            entry.headers.clone(),
            entry.body.clone(),
        ))
    }

    /// Stores a completed exchange under the key.
    pub(crate) fn store(&self, key: CacheKey, response: &Response) {
        self.entries.insert(
            key,
            CachedEntry {
                status: response.status,
                reason: response.reason.clone(),
                headers: response.headers.clone(),
                body: response.body.clone(),
            },
        );
    }

    /// Drops every entry.
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

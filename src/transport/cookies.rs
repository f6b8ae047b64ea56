//! Session cookie jar.
//!
//! Cookies set by responses (including intermediate redirect hops) accumulate
//! here and are replayed on later requests to matching hosts and paths. The
//! jar can be seeded from configuration and can be told to drop session
//! cookies (those without an expiry) entirely, which some scans use to probe
//! session-handling behavior.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::message::HeaderMap;

fn default_cookie_path() -> String {
    "/".to_string()
}

/// One cookie, as stored and as exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,

    /// Cookie value.
    pub value: String,

    /// Domain the cookie applies to (no leading dot).
    pub domain: String,

    /// Path prefix the cookie applies to.
    #[serde(default = "default_cookie_path")]
    pub path: String,

    /// Only sent over TLS when set.
    #[serde(default)]
    pub secure: bool,

    /// Absolute expiry; `None` marks a session cookie.
    #[serde(default)]
    pub expires: Option<SystemTime>,
}

impl Cookie {
    fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= SystemTime::now())
    }

    fn is_session(&self) -> bool {
        self.expires.is_none()
    }
}

struct StoredCookie {
    cookie: Cookie,
    /// Set when the cookie carried no `Domain` attribute: it then matches
    /// its origin host exactly, never subdomains.
    host_only: bool,
}

impl StoredCookie {
    fn matches(&self, host: &str, path: &str, secure: bool) -> bool {
        if self.cookie.secure && !secure {
            return false;
        }
        let domain_ok = if self.host_only {
            host.eq_ignore_ascii_case(&self.cookie.domain)
        } else {
            host.eq_ignore_ascii_case(&self.cookie.domain)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", self.cookie.domain.to_ascii_lowercase()))
        };
        domain_ok && path_matches(&self.cookie.path, path)
    }
}

/// RFC 6265 path-match: exact, or prefix ending at a `/` boundary.
fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

/// The directory of a request path, used when `Set-Cookie` omits `Path`.
fn default_path_for(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

/// Thread-safe cookie store shared by all exchanges of an engine.
pub(crate) struct CookieJar {
    inner: Mutex<Vec<StoredCookie>>,
    ignore_session: bool,
}

impl CookieJar {
    pub(crate) fn new(ignore_session: bool) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            ignore_session,
        }
    }

    /// Inserts configured cookies. Seeds honor the same session filter as
    /// response cookies.
    pub(crate) fn seed(&self, cookies: Vec<Cookie>) {
        for cookie in cookies {
            self.insert(cookie, false);
        }
    }

    /// Parses and stores every `Set-Cookie` header of a response.
    pub(crate) fn store_response_cookies(
        &self,
        headers: &HeaderMap,
        host: &str,
        request_path: &str,
    ) {
        for raw in headers.get_all("set-cookie") {
            if let Some((cookie, host_only)) = parse_set_cookie(raw, host, request_path) {
                debug!(name = %cookie.name, domain = %cookie.domain, "storing cookie");
                self.insert(cookie, host_only);
            }
        }
    }

    /// Builds the `Cookie` header value for a request, or `None` when no
    /// stored cookie matches.
    pub(crate) fn header_for(&self, host: &str, path: &str, secure: bool) -> Option<String> {
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
        let stored = self.inner.lock().unwrap();
        let pairs: Vec<String> = stored
            .iter()
            .filter(|entry| {
                !entry.cookie.is_expired()
                    && !(self.ignore_session && entry.cookie.is_session())
                    && entry.matches(host, path, secure)
            })
            .map(|entry| format!("{}={}", entry.cookie.name, entry.cookie.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Snapshot of every live cookie in the jar.
    pub(crate) fn cookies(&self) -> Vec<Cookie> {
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
        let stored = self.inner.lock().unwrap();
        stored
            .iter()
            .filter(|entry| !entry.cookie.is_expired())
            .map(|entry| entry.cookie.clone())
            .collect()
    }

    /// Replaces on (name, domain, path); an already-expired cookie acts as a
    /// deletion, which is how servers clear cookies.
    fn insert(&self, cookie: Cookie, host_only: bool) {
        if self.ignore_session && cookie.is_session() {
            debug!(name = %cookie.name, "dropping session cookie");
            return;
        }
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
        let mut stored = self.inner.lock().unwrap();
        stored.retain(|entry| {
            !(entry.cookie.name == cookie.name
                && entry.cookie.domain.eq_ignore_ascii_case(&cookie.domain)
                && entry.cookie.path == cookie.path)
        });
        if !cookie.is_expired() {
            stored.push(StoredCookie { cookie, host_only });
        }
    }
}

/// Parses one `Set-Cookie` value. Returns the cookie plus its host-only flag,
/// or `None` for unparseable input.
fn parse_set_cookie(raw: &str, host: &str, request_path: &str) -> Option<(Cookie, bool)> {
    let mut parts = raw.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: host.to_ascii_lowercase(),
        path: default_path_for(request_path),
        secure: false,
        expires: None,
    };
    let mut host_only = true;
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "expires" => {
                if let Ok(at) = httpdate::parse_http_date(val) {
                    cookie.expires = Some(at);
                }
            }
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    max_age = Some(secs);
                }
            }
            "secure" => cookie.secure = true,
            _ => {}
        }
    }

    // Max-Age wins over Expires when both are present.
    if let Some(secs) = max_age {
        cookie.expires = Some(if secs <= 0 {
            SystemTime::UNIX_EPOCH
        } else {
            SystemTime::now() + Duration::from_secs(secs.unsigned_abs())
        });
    }

    Some((cookie, host_only))
}

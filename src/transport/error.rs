//! Error types for the transport engine.
//!
//! A [`TransportError`] is always tagged with the id of the request that
//! produced it, so batch callers can attribute failures even when results
//! arrive out of order. Ordinary HTTP error statuses (4xx/5xx) are valid
//! responses, never errors.

use thiserror::Error;

/// A transport failure, tagged with the originating request id.
#[derive(Debug, Error)]
#[error("request #{request_id}: {kind}")]
pub struct TransportError {
    /// Id of the request that failed.
    pub request_id: u64,

    /// What went wrong.
    pub kind: TransportErrorKind,
}

impl TransportError {
    /// Tags a failure kind with its originating request.
    #[must_use]
    pub fn new(request_id: u64, kind: TransportErrorKind) -> Self {
        Self { request_id, kind }
    }
}

/// The kinds of failure a wire exchange can surface.
///
/// Mangle and cache failures are deliberately absent: they are recovered
/// locally (skip-and-continue) and only show up in diagnostic logging.
#[derive(Debug, Error)]
pub enum TransportErrorKind {
    /// The target (or proxy) actively refused the TCP connection.
    #[error("connection refused by {host}:{port}")]
    ConnectionRefused {
        /// Host that refused the connection.
        host: String,
        /// Port the connection was attempted on.
        port: u16,
    },

    /// The connection was reset or closed mid-exchange.
    #[error("connection reset during exchange with {url}")]
    ConnectionReset {
        /// URL of the interrupted exchange.
        url: String,
    },

    /// Hostname resolution failed.
    #[error("DNS resolution failed for {host}")]
    DnsFailure {
        /// Host that could not be resolved.
        host: String,
    },

    /// TLS handshake failure (direct or over a CONNECT tunnel).
    #[error("TLS handshake with {host} failed: {reason}")]
    TlsFailure {
        /// Host the handshake was attempted against.
        host: String,
        /// Handshake failure detail.
        reason: String,
    },

    /// The exchange did not complete within the configured timeout.
    #[error("timeout after {seconds}s waiting on {url}")]
    Timeout {
        /// URL of the timed-out exchange.
        url: String,
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// Too many redirect hops (or a redirect loop).
    #[error("redirect limit ({limit}) exceeded starting from {url}")]
    RedirectLimitExceeded {
        /// URL the redirect chain started from.
        url: String,
        /// Configured hop limit.
        limit: u32,
    },

    /// The response body exceeds the configured byte ceiling.
    #[error("response body for {url} exceeds the configured ceiling of {limit} bytes")]
    ResponseTooLarge {
        /// URL whose response was oversized.
        url: String,
        /// Configured byte ceiling.
        limit: usize,
    },

    /// The request URL (or a redirect Location) could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },

    /// The proxy rejected a CONNECT tunnel request.
    #[error("proxy refused CONNECT to {target}: HTTP {status}")]
    ProxyConnect {
        /// The `host:port` the tunnel was requested for.
        target: String,
        /// Status code the proxy answered with.
        status: u16,
    },

    /// The server sent bytes that do not parse as an HTTP response.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// URL of the exchange.
        url: String,
        /// Parse failure detail.
        reason: String,
    },
}

impl TransportErrorKind {
    /// Maps an I/O error observed during connect/write/read onto a kind.
    pub(crate) fn from_io(error: &std::io::Error, url: &str, host: &str, port: u16) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused {
                host: host.to_string(),
                port,
            },
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::ConnectionReset {
                url: url.to_string(),
            },
            _ => Self::ConnectionReset {
                url: url.to_string(),
            },
        }
    }

    /// Returns true for failures that happen at the connection level, where a
    /// fresh connection may behave differently than a stale pooled one.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectionReset { .. }
                | Self::Timeout { .. }
                | Self::MalformedResponse { .. }
        )
    }
}

/// A failure raised by a single mangle plugin.
///
/// Non-fatal by design: the chain logs it, skips that plugin's transform for
/// the current message, and continues with the remaining plugins.
#[derive(Debug, Error)]
#[error("mangle plugin '{plugin}' failed: {reason}")]
pub struct MangleError {
    /// Name of the failing plugin.
    pub plugin: String,

    /// What the plugin reported.
    pub reason: String,
}

impl MangleError {
    /// Creates a mangle failure report.
    #[must_use]
    pub fn new(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}

//! Engine configuration and validation.
//!
//! The configuration is an explicit value passed into engine construction,
//! not a shared mutable store: when settings change materially (a new proxy,
//! new credentials), the caller builds a new engine and in-flight exchanges
//! keep the snapshot they started with.
//!
//! # Example
//!
//! ```
//! use wirescan::EngineConfig;
//!
//! let mut config = EngineConfig::default();
//! config.timeout_secs = 15;
//! config.max_redirects = 10;
//! assert!(config.validate().is_ok());
//! ```

use std::io::BufRead;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::transport::cookies::Cookie;

/// Minimum allowed request timeout in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;

/// Maximum allowed request timeout in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 60;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default maximum number of transparent retries for idempotent methods.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default response body byte ceiling (400 KB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 400_000;

/// Default redirect hop limit.
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Default idle-connection expiry in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Errors produced while validating or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Timeout outside the 1–60 second range.
    #[error("timeout must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds, got {value}")]
    InvalidTimeout {
        /// The rejected value.
        value: u64,
    },

    /// Proxy port of zero.
    #[error("invalid proxy port: {value}")]
    InvalidProxyPort {
        /// The rejected value.
        value: u16,
    },

    /// A redirect limit of zero would make every 3xx a hard failure.
    #[error("redirect limit must be at least 1")]
    InvalidRedirectLimit,

    /// The extra-headers file could not be read.
    #[error("unable to read headers file {path}: {source}")]
    HeadersFile {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// An outgoing HTTP proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host (IP address or name).
    pub host: String,

    /// Proxy TCP port.
    pub port: u16,
}

/// A Basic-auth credential scope bound to a URL prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct BasicCredentials {
    /// URL prefix the credential applies to (e.g. `http://target.example/admin/`).
    pub url_prefix: String,

    /// Username.
    pub username: String,

    /// Password.
    pub password: String,
}

/// An NTLM credential scope bound to a URL prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct NtlmCredentials {
    /// URL prefix the credential applies to.
    pub url_prefix: String,

    /// Windows domain name; the wire username is `domain\username`.
    pub domain: String,

    /// Username (without the domain qualifier).
    pub username: String,

    /// Password.
    pub password: String,
}

/// Policy for which request headers participate in cache key derivation.
///
/// Volatile headers must be excluded so that two semantically identical
/// requests derive equal keys. The exact set is a policy decision, not a
/// hardcoded constant.
#[derive(Debug, Clone, Deserialize)]
pub struct CachePolicy {
    /// Header names (case-insensitive) ignored when deriving cache keys.
    pub ignored_headers: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ignored_headers: vec![
                "cookie".to_string(),
                "authorization".to_string(),
                "date".to_string(),
                "user-agent".to_string(),
                "if-modified-since".to_string(),
                "if-none-match".to_string(),
            ],
        }
    }
}

impl CachePolicy {
    /// Returns true if the header participates in key derivation.
    #[must_use]
    pub fn includes(&self, name: &str) -> bool {
        !self
            .ignored_headers
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(name))
    }
}

/// Full configuration surface of the transport engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-exchange timeout in seconds (1–60).
    pub timeout_secs: u64,

    /// Maximum transparent retries for idempotent methods on
    /// connection-level failures.
    pub max_retries: u32,

    /// Response body byte ceiling; larger bodies fail with `ResponseTooLarge`.
    pub max_body_size: usize,

    /// Redirect hop limit.
    pub max_redirects: u32,

    /// Idle pooled connections older than this are discarded on acquire.
    pub idle_timeout_secs: u64,

    /// Outgoing HTTP proxy, if any.
    pub proxy: Option<ProxyConfig>,

    /// Basic-auth scope, at most one.
    pub basic_auth: Option<BasicCredentials>,

    /// NTLM scope, at most one.
    pub ntlm_auth: Option<NtlmCredentials>,

    /// User-Agent sent when the request does not carry one.
    pub user_agent: String,

    /// Headers added to every request that does not already carry them.
    pub extra_headers: Vec<(String, String)>,

    /// Cookies seeding the session jar.
    pub seed_cookies: Vec<Cookie>,

    /// When set, cookies without an expiry (session cookies) are neither
    /// stored nor replayed.
    pub ignore_session_cookies: bool,

    /// Path parameter appended to every accessed URL
    /// (e.g. `http://target/index.jsp;PARAM?id=2`).
    pub url_parameter: Option<String>,

    /// When set, the response cache is skipped entirely.
    pub bypass_cache: bool,

    /// Header-subset policy for cache key derivation.
    pub cache_policy: CachePolicy,

    /// Minimum delay between exchanges to the same host, in milliseconds.
    /// Zero disables pacing.
    pub host_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            proxy: None,
            basic_auth: None,
            ntlm_auth: None,
            user_agent: format!("Mozilla/5.0 (compatible; wirescan/{})", env!("CARGO_PKG_VERSION")),
            extra_headers: Vec::new(),
            seed_cookies: Vec::new(),
            ignore_session_cookies: false,
            url_parameter: None,
            bypass_cache: false,
            cache_policy: CachePolicy::default(),
            host_delay_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration for values the engine refuses to run with.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first rejected setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout {
                value: self.timeout_secs,
            });
        }
        if let Some(proxy) = &self.proxy {
            if proxy.port == 0 {
                return Err(ConfigError::InvalidProxyPort { value: proxy.port });
            }
        }
        if self.max_redirects == 0 {
            return Err(ConfigError::InvalidRedirectLimit);
        }
        Ok(())
    }

    /// Loads extra headers from a file of `Name: value` lines and appends
    /// them to [`extra_headers`](Self::extra_headers).
    ///
    /// Blank lines and lines without a colon are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HeadersFile`] if the file cannot be read.
    pub fn load_headers_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let file = std::fs::File::open(path).map_err(|source| ConfigError::HeadersFile {
            path: path.to_path_buf(),
            source,
        })?;

        for line in std::io::BufReader::new(file).lines() {
            let line = line.map_err(|source| ConfigError::HeadersFile {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                let value = value.trim();
                if !name.is_empty() {
                    self.extra_headers
                        .push((name.to_string(), value.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut config = EngineConfig::default();

        config.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { value: 0 })
        ));

        config.timeout_secs = 61;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { value: 61 })
        ));

        config.timeout_secs = 1;
        assert!(config.validate().is_ok());
        config.timeout_secs = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_proxy_port_zero_rejected() {
        let mut config = EngineConfig::default();
        config.proxy = Some(ProxyConfig {
            host: "127.0.0.1".into(),
            port: 0,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProxyPort { value: 0 })
        ));
    }

    #[test]
    fn test_redirect_limit_zero_rejected() {
        let mut config = EngineConfig::default();
        config.max_redirects = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRedirectLimit)
        ));
    }

    #[test]
    fn test_cache_policy_excludes_volatile_headers() {
        let policy = CachePolicy::default();
        assert!(!policy.includes("Cookie"));
        assert!(!policy.includes("AUTHORIZATION"));
        assert!(policy.includes("Accept"));
        assert!(policy.includes("Range"));
    }

    #[test]
    fn test_load_headers_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "X-Scanner: wirescan").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not a header line").unwrap();
        writeln!(file, "Accept-Language: en").unwrap();
        file.flush().unwrap();

        let mut config = EngineConfig::default();
        config.load_headers_file(file.path()).unwrap();

        assert_eq!(
            config.extra_headers,
            vec![
                ("X-Scanner".to_string(), "wirescan".to_string()),
                ("Accept-Language".to_string(), "en".to_string()),
            ]
        );
    }

    #[test]
    fn test_load_headers_file_missing() {
        let mut config = EngineConfig::default();
        let result = config.load_headers_file(Path::new("/nonexistent/headers.txt"));
        assert!(matches!(result, Err(ConfigError::HeadersFile { .. })));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"timeout_secs": 5, "bypass_cache": true}"#).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.bypass_cache);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
    }
}
